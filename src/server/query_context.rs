//! Per-request query state.
//!
//! A `QueryContext` is created for each API request and passed explicitly to
//! every pipeline step. It owns the in-progress `SelectQuery`, the join and
//! GROUP BY registries, the set of fields that may be sorted on, and the
//! record of which parameters and include/exclude items were understood.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value};

use super::errors::ApiError;
use crate::catalog::ColumnMap;
use crate::config::Limits;
use crate::predicate::validate;
use crate::query_builder::{Join, JoinType, Predicate, SelectQuery, SqlFragment};
use crate::translation::TranslationOptions;

/// Parameters every route understands.
const BASE_PARAMS: [&str; 5] = ["cache", "echo", "exclude", "include", "indent"];

/// Names of parameters and include/exclude items consumed while building the query.
#[derive(Debug, Clone, Default)]
pub struct KnownParams {
    names: HashSet<String>,
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl KnownParams {
    pub fn new() -> Self {
        KnownParams {
            names: BASE_PARAMS.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn mark(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    pub fn mark_include(&mut self, item: &str) {
        self.include.insert(item.to_string());
    }

    pub fn mark_exclude(&mut self, item: &str) {
        self.exclude.insert(item.to_string());
    }

    /// Report every unrecognized parameter and include/exclude item in one error.
    pub fn check(
        &self,
        params: &Map<String, Value>,
        include: &BTreeSet<String>,
        exclude: &BTreeSet<String>,
    ) -> Result<(), ApiError> {
        let mut unknown: Vec<&str> = params
            .keys()
            .map(String::as_str)
            .filter(|k| !self.names.contains(*k))
            .collect();
        unknown.sort_unstable();

        let unknown_exclude: Vec<&str> = exclude
            .iter()
            .map(String::as_str)
            .filter(|k| !self.exclude.contains(*k))
            .collect();
        let unknown_include: Vec<&str> = include
            .iter()
            .map(String::as_str)
            .filter(|k| !self.include.contains(*k))
            .collect();

        let mut parts = Vec::new();
        if !unknown.is_empty() {
            parts.push(format!(
                "the following parameters are unknown or incompatible with your query: {}",
                unknown.join(", ")
            ));
        }
        for (clude, items) in [("exclude", unknown_exclude), ("include", unknown_include)] {
            if !items.is_empty() {
                parts.push(format!(
                    "the following {} items are unknown or incompatible with your query: {}",
                    clude,
                    items.join(", ")
                ));
            }
        }

        if parts.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid(parts.join("; ")))
        }
    }
}

/// Typed flags shared between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    /// Number of search parameters supplied, for routes that gate offset/after on it.
    pub num_params: usize,
    pub translation: Option<TranslationOptions>,
    /// Definition queries that filter on or include denotation expressions.
    pub definition_expr: bool,
    pub json_indent: bool,
    /// Render the query text instead of executing it.
    pub sql_debug: bool,
}

/// Query-building state set aside while a nested query is built.
#[derive(Debug)]
pub struct QueryScope {
    query: SelectQuery,
    joins: HashSet<String>,
    group_by: HashSet<String>,
}

#[derive(Debug)]
pub struct QueryContext {
    params: Map<String, Value>,
    pub query: SelectQuery,
    joins: HashSet<String>,
    group_by: HashSet<String>,
    sortable: HashSet<String>,
    known: KnownParams,
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    pub state: RequestState,
    pub response: Map<String, Value>,
    pub limits: Limits,
}

impl QueryContext {
    pub fn new(params: Map<String, Value>, limits: Limits) -> Self {
        QueryContext {
            params,
            query: SelectQuery::from(""),
            joins: HashSet::new(),
            group_by: HashSet::new(),
            sortable: HashSet::new(),
            known: KnownParams::new(),
            include: BTreeSet::new(),
            exclude: BTreeSet::new(),
            state: RequestState::default(),
            response: Map::new(),
            limits,
        }
    }

    /// Parse `include`, `exclude` and `indent`.
    pub fn init_state(&mut self, development: bool) -> Result<(), ApiError> {
        for clude in ["exclude", "include"] {
            let Some(items) = self.params.get(clude) else {
                continue;
            };
            let items = validate::array_or_empty(Some(items), clude, self.limits.array_max)?;
            let mut set = BTreeSet::new();
            for item in items {
                set.insert(validate::string(item, clude, true, false)?.to_string());
            }
            if clude == "include" {
                self.include = set;
            } else {
                self.exclude = set;
            }
        }

        let indent = match self.params.get("indent") {
            Some(v) => validate::boolean(v, "indent")?,
            None => false,
        };
        self.state.json_indent = development || indent;
        Ok(())
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Read a parameter without marking it known.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Mark a parameter known and return its value.
    pub fn consume(&mut self, name: &str) -> Option<Value> {
        let value = self.params.get(name).cloned();
        if value.is_some() {
            self.known.mark(name);
        }
        value
    }

    /// Mark an array parameter known and return its elements.
    pub fn consume_array(&mut self, name: &str) -> Result<Option<Vec<Value>>, ApiError> {
        let Some(value) = self.consume(name) else {
            return Ok(None);
        };
        let items = validate::array_or_empty(Some(&value), name, self.limits.array_max)?;
        Ok(Some(items.to_vec()))
    }

    /// Mark a boolean parameter known and return its value.
    pub fn consume_bool(&mut self, name: &str) -> Result<Option<bool>, ApiError> {
        self.consume(name)
            .map(|v| validate::boolean(&v, name))
            .transpose()
    }

    pub fn mark_known(&mut self, name: &str) {
        self.known.mark(name);
    }

    /// True when `item` was requested under `include`; marks it understood.
    pub fn includes(&mut self, item: &str) -> bool {
        if self.include.contains(item) {
            self.known.mark_include(item);
            true
        } else {
            false
        }
    }

    pub fn mark_sortable(&mut self, col: &str) {
        self.sortable.insert(col.to_string());
    }

    pub fn is_sortable(&self, col: &str) -> bool {
        self.sortable.contains(col)
    }

    /// Select columns, honoring `exclude`. Only projected columns become
    /// sortable.
    pub fn select_cols<S: AsRef<str>>(&mut self, map: &ColumnMap, cols: &[S]) {
        for col in cols {
            let col = col.as_ref();
            let Some(def) = map.get(col) else {
                log::warn!("select_cols: no column '{}' in map for {}", col, map.table());
                continue;
            };
            if self.exclude.contains(col) {
                self.known.mark_exclude(col);
                continue;
            }
            if def.sortable {
                self.sortable.insert(col.to_string());
            }
            self.query.push_select(SqlFragment::raw(def.sql_expr_aliased.clone()));
        }
    }

    /// Select one mapped column, ignoring `exclude`.
    pub fn select_col(&mut self, map: &ColumnMap, col: &str) {
        match map.get(col) {
            Some(def) => {
                if def.sortable {
                    self.sortable.insert(col.to_string());
                }
                self.query.push_select(SqlFragment::raw(def.sql_expr_aliased.clone()));
            }
            None => log::warn!("select_col: no column '{}' in map for {}", col, map.table()),
        }
    }

    /// Select a raw expression.
    pub fn select_expr(&mut self, expr: &str) {
        self.query.push_select(SqlFragment::raw(expr));
    }

    /// Add `join` unless its alias is already joined in this request.
    pub fn ensure_join(&mut self, join: Join) {
        if self.joins.insert(join.alias.clone()) {
            self.query.joins.push(join);
        }
    }

    pub fn ensure_left_join(&mut self, join: Join) {
        self.ensure_join(Join {
            join_type: JoinType::Left,
            ..join
        });
    }

    pub fn is_joined(&self, alias: &str) -> bool {
        self.joins.contains(alias)
    }

    /// Add GROUP BY expressions not yet registered in this request.
    pub fn group_by(&mut self, exprs: &[&str]) {
        for expr in exprs {
            if self.group_by.insert(expr.to_string()) {
                self.query.group_by.push(expr.to_string());
            }
        }
    }

    pub fn filter(&mut self, predicate: Predicate) {
        self.query.push_filter(predicate);
    }

    /// Start building `query` with fresh join and GROUP BY registries. The
    /// returned scope restores the outer query in `leave_query`.
    pub fn enter_query(&mut self, query: SelectQuery) -> QueryScope {
        QueryScope {
            query: std::mem::replace(&mut self.query, query),
            joins: std::mem::take(&mut self.joins),
            group_by: std::mem::take(&mut self.group_by),
        }
    }

    /// Restore `outer` and return the nested query.
    pub fn leave_query(&mut self, outer: QueryScope) -> SelectQuery {
        self.joins = outer.joins;
        self.group_by = outer.group_by;
        std::mem::replace(&mut self.query, outer.query)
    }

    /// Fail with every parameter or include/exclude item nothing consumed.
    pub fn check_unknown_params(&self) -> Result<(), ApiError> {
        self.known.check(&self.params, &self.include, &self.exclude)
    }

    pub fn set_response(&mut self, key: &str, value: Value) {
        self.response.insert(key.to_string(), value);
    }
}

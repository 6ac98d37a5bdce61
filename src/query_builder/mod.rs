//! Parameterized SELECT construction.
//!
//! `SelectQuery` is the in-progress query a request handler mutates. It is
//! rendered once, at execution time, into a `CompiledQuery` whose placeholders
//! are numbered in clause order.

pub mod condition;
pub mod fragment;

pub use condition::{Comparison, Predicate};
pub use fragment::{quote_literal, CompiledQuery, SqlFragment, SqlValue, SqlWriter};

use std::fmt;

pub trait ToSql {
    fn write_sql(&self, out: &mut SqlWriter);

    /// Render with every bound value inlined as a literal.
    fn to_sql(&self) -> String {
        let mut out = SqlWriter::inlining();
        self.write_sql(&mut out);
        out.finish().sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table(String),
    Subquery(Box<SelectQuery>, String),
    /// Set-returning function call with bound arguments.
    Call(SqlFragment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinSource {
    /// Relation name, optionally followed by `as <alias>`.
    Table(String),
    Lateral(Box<SelectQuery>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub source: JoinSource,
    /// Name the rest of the query refers to this join by.
    pub alias: String,
    pub joining_on: Vec<Predicate>,
}

impl Join {
    /// Inner join. `table` is either a bare relation or `"<relation> as <alias>"`.
    pub fn inner(table: &str, joining_on: Vec<Predicate>) -> Self {
        Join {
            join_type: JoinType::Inner,
            source: JoinSource::Table(table.to_string()),
            alias: alias_of(table),
            joining_on,
        }
    }

    /// `left join lateral (<subquery>) as <alias> on true`
    pub fn left_lateral(subquery: SelectQuery, alias: &str) -> Self {
        Join {
            join_type: JoinType::Left,
            source: JoinSource::Lateral(Box::new(subquery)),
            alias: alias.to_string(),
            joining_on: Vec::new(),
        }
    }

    /// Equi-join shorthand: `table on left = right`.
    pub fn on_columns(table: &str, left: &str, right: &str) -> Self {
        Join::inner(table, vec![Predicate::columns_eq(left, right)])
    }
}

/// `"denotationx as denotation"` -> `"denotation"`, `"langvar"` -> `"langvar"`.
fn alias_of(table: &str) -> String {
    match table.rsplit_once(" as ") {
        Some((_, alias)) => alias.trim().to_string(),
        None => table.trim().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByOrder {
    Asc,
    Desc,
}

impl fmt::Display for OrderByOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderByOrder::Asc => write!(f, "asc"),
            OrderByOrder::Desc => write!(f, "desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: String,
    pub order: Option<OrderByOrder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub select: Vec<SqlFragment>,
    pub from: FromItem,
    pub joins: Vec<Join>,
    pub filters: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub having: Vec<Predicate>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SelectQuery {
    pub fn from(table: &str) -> Self {
        SelectQuery {
            select: Vec::new(),
            from: FromItem::Table(table.to_string()),
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// `select count(*) as count from (<inner>) as s`
    pub fn count_of(inner: SelectQuery) -> Self {
        SelectQuery {
            from: FromItem::Subquery(Box::new(inner), "s".to_string()),
            ..SelectQuery::from("")
        }
        .select_raw("count(*) as count")
    }

    /// Select from a set-returning function, e.g. `f(?,?)`.
    pub fn from_call(call: SqlFragment) -> Self {
        SelectQuery {
            from: FromItem::Call(call),
            ..SelectQuery::from("")
        }
    }

    /// Wrap `inner` as a derived table.
    pub fn from_subquery(inner: SelectQuery, alias: &str) -> Self {
        SelectQuery {
            from: FromItem::Subquery(Box::new(inner), alias.to_string()),
            ..SelectQuery::from("")
        }
    }

    pub fn select_raw(mut self, expr: &str) -> Self {
        self.select.push(SqlFragment::raw(expr));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having.push(predicate);
        self
    }

    pub fn group_by(mut self, expr: &str) -> Self {
        self.group_by.push(expr.to_string());
        self
    }

    pub fn order_by(mut self, expr: &str, order: OrderByOrder) -> Self {
        self.push_order_by(expr, Some(order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn push_select(&mut self, fragment: SqlFragment) {
        self.select.push(fragment);
    }

    pub fn push_filter(&mut self, predicate: Predicate) {
        self.filters.push(predicate);
    }

    pub fn push_having(&mut self, predicate: Predicate) {
        self.having.push(predicate);
    }

    pub fn push_order_by(&mut self, expr: &str, order: Option<OrderByOrder>) {
        self.order_by.push(OrderByItem {
            expression: expr.to_string(),
            order,
        });
    }

    /// True when at least one WHERE predicate is present.
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Render with `$n` placeholders.
    pub fn compile(&self) -> CompiledQuery {
        let mut out = SqlWriter::new();
        self.write_sql(&mut out);
        out.finish()
    }
}

impl ToSql for FromItem {
    fn write_sql(&self, out: &mut SqlWriter) {
        match self {
            FromItem::Table(table) => out.push_str(table),
            FromItem::Call(call) => out.push_fragment(call),
            FromItem::Subquery(q, alias) => {
                out.push_str("(");
                q.write_sql(out);
                out.push_str(") as ");
                out.push_str(alias);
            }
        }
    }
}

impl ToSql for Join {
    fn write_sql(&self, out: &mut SqlWriter) {
        out.push_str(match self.join_type {
            JoinType::Inner => " inner join ",
            JoinType::Left => " left join ",
        });
        match &self.source {
            JoinSource::Table(table) => out.push_str(table),
            JoinSource::Lateral(q) => {
                out.push_str("lateral (");
                q.write_sql(out);
                out.push_str(") as ");
                out.push_str(&self.alias);
            }
        }
        out.push_str(" on ");
        if self.joining_on.is_empty() {
            out.push_str("true");
        }
        for (i, cond) in self.joining_on.iter().enumerate() {
            if i > 0 {
                out.push_str(" and ");
            }
            cond.write_sql(out);
        }
    }
}

impl ToSql for SelectQuery {
    fn write_sql(&self, out: &mut SqlWriter) {
        out.push_str("select ");
        if self.select.is_empty() {
            out.push_str("*");
        }
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_fragment(item);
        }

        out.push_str(" from ");
        self.from.write_sql(out);

        for join in &self.joins {
            join.write_sql(out);
        }

        write_conditions(out, " where ", &self.filters);

        if !self.group_by.is_empty() {
            out.push_str(" group by ");
            out.push_str(&self.group_by.join(", "));
        }

        write_conditions(out, " having ", &self.having);

        if !self.order_by.is_empty() {
            out.push_str(" order by ");
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&item.expression);
                if let Some(order) = item.order {
                    out.push_str(&format!(" {}", order));
                }
            }
        }

        if let Some(limit) = self.limit {
            out.push_str(&format!(" limit {}", limit));
        }
        if let Some(offset) = self.offset {
            out.push_str(&format!(" offset {}", offset));
        }
    }
}

fn write_conditions(out: &mut SqlWriter, keyword: &str, conditions: &[Predicate]) {
    if conditions.is_empty() {
        return;
    }
    out.push_str(keyword);
    for (i, cond) in conditions.iter().enumerate() {
        if i > 0 {
            out.push_str(" and ");
        }
        cond.write_sql(out);
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

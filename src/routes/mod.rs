//! API routes.
//!
//! Each lexical entity implements [`Entity`]: how its query starts, which
//! columns and includes it selects, and which filters it understands. The
//! generic handlers here turn that into the listing, `/count` and
//! by-identifier routes.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::catalog::ColumnMap;
use crate::pagination::{apply_global_params, ListingOptions};
use crate::query_builder::{Comparison, Join, Predicate, SelectQuery, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::{Execution, PathParams, Route, RouteHandler, RouteSpec};
use crate::server::query_context::QueryContext;
use crate::server::AppState;

pub mod definition;
pub mod denotation;
pub mod expr;
pub mod langvar;
pub mod langvar_pair;
pub mod meaning;
pub mod norm;
pub mod source;
pub mod txt_degr;

lazy_static! {
    pub(crate) static ref NUMERIC_ID: Regex = Regex::new(r"^\d+$").unwrap();
}

type Matcher = fn(&[Value], &str) -> Result<Comparison, ApiError>;

pub trait Entity: Send + Sync + 'static {
    /// `resultType`, `countType`, and the response key of by-identifier routes.
    const NAME: &'static str;
    /// Relation the query starts from, aliased to `NAME` when they differ.
    const FROM: &'static str;
    /// Used in by-identifier error messages.
    const LABEL: &'static str;
    const ARRAY_PARAMS: &'static [&'static str];
    const LISTING: ListingOptions;

    fn column_map() -> &'static ColumnMap;

    /// Read request-level options before the query is built.
    fn prepare(_ctx: &mut QueryContext) -> Result<(), ApiError> {
        Ok(())
    }

    fn start_query(ctx: &mut QueryContext) {
        ctx.query = SelectQuery::from(Self::FROM);
    }

    /// Project the default columns and requested includes.
    fn select(ctx: &mut QueryContext) -> Result<(), ApiError>;

    /// Apply filter parameters; returns how many search parameters were given.
    fn conditions(ctx: &mut QueryContext, counting: bool) -> Result<usize, ApiError>;

    /// Row named by a by-identifier path segment.
    fn lookup(key: &str) -> Result<Predicate, ApiError> {
        if !NUMERIC_ID.is_match(key) {
            return Err(ApiError::invalid(format!(
                "the {} must be specified as a numeric id",
                Self::LABEL
            )));
        }
        Ok(Predicate::eq(
            format!("{}.id", Self::NAME),
            SqlValue::Int(parse_id(key)?),
        ))
    }

    fn transform(_row: &mut Value) {}
}

pub(crate) fn parse_id(key: &str) -> Result<i64, ApiError> {
    key.parse()
        .map_err(|_| ApiError::invalid(format!("invalid id: {}", key)))
}

pub fn build_listing<E: Entity>(ctx: &mut QueryContext) -> Result<(), ApiError> {
    E::prepare(ctx)?;
    E::start_query(ctx);
    E::select(ctx)?;
    ctx.state.num_params = E::conditions(ctx, false)?;
    apply_global_params(ctx, E::column_map(), &E::LISTING)?;
    ctx.set_response("resultType", Value::from(E::NAME));
    Ok(())
}

/// `select count(*) from (select <name>.id from <from> <conditions>) as s`
pub fn build_count<E: Entity>(ctx: &mut QueryContext) -> Result<(), ApiError> {
    E::prepare(ctx)?;
    E::start_query(ctx);
    ctx.select_expr(&format!("{}.id", E::NAME));
    E::conditions(ctx, true)?;
    let inner = std::mem::replace(&mut ctx.query, SelectQuery::from(""));
    ctx.query = SelectQuery::count_of(inner);
    Ok(())
}

pub fn build_lookup<E: Entity>(ctx: &mut QueryContext, key: &str) -> Result<(), ApiError> {
    let lookup = E::lookup(key)?;
    E::start_query(ctx);
    E::select(ctx)?;
    ctx.filter(lookup);
    Ok(())
}

fn not_found<E: Entity>(key: &str) -> String {
    format!("{} {} was not found", E::LABEL, key)
}

pub struct List<E>(PhantomData<fn() -> E>);
pub struct Count<E>(PhantomData<fn() -> E>);
pub struct ById<E>(PhantomData<fn() -> E>);

#[async_trait]
impl<E: Entity> RouteHandler for List<E> {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        _path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        build_listing::<E>(ctx)?;
        Ok(Execution::Listing)
    }

    fn transform(&self, row: &mut Value) {
        E::transform(row)
    }
}

#[async_trait]
impl<E: Entity> RouteHandler for Count<E> {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        _path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        build_count::<E>(ctx)?;
        Ok(Execution::Count {
            count_type: E::NAME,
        })
    }
}

#[async_trait]
impl<E: Entity> RouteHandler for ById<E> {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        let key = path_param(path, "id")?;
        build_lookup::<E>(ctx, key)?;
        Ok(Execution::Single {
            key: E::NAME,
            not_found: not_found::<E>(key),
        })
    }

    fn transform(&self, row: &mut Value) {
        E::transform(row)
    }
}

pub(crate) fn path_param<'a>(path: &'a PathParams, name: &str) -> Result<&'a str, ApiError> {
    path.get(name)
        .map(String::as_str)
        .ok_or_else(|| ApiError::Internal(format!("route has no path parameter '{}'", name)))
}

/// Listing, `/count` and by-identifier routes of `E`, rooted at `base`.
pub fn entity_routes<E: Entity>(
    base: &'static str,
    count: &'static str,
    by_id: &'static str,
) -> Vec<Arc<Route>> {
    vec![
        Route::new(
            RouteSpec {
                path: base,
                array_params: E::ARRAY_PARAMS,
                cacheable: true,
            },
            List::<E>(PhantomData),
        ),
        Route::new(
            RouteSpec {
                path: count,
                array_params: E::ARRAY_PARAMS,
                cacheable: true,
            },
            Count::<E>(PhantomData),
        ),
        Route::new(
            RouteSpec {
                path: by_id,
                array_params: &[],
                cacheable: true,
            },
            ById::<E>(PhantomData),
        ),
    ]
}

/// Every API route served under `/v2`.
pub fn all() -> Vec<Arc<Route>> {
    let mut routes = Vec::new();
    routes.extend(expr::routes());
    routes.extend(langvar::routes());
    routes.extend(langvar_pair::routes());
    routes.extend(denotation::routes());
    routes.extend(meaning::routes());
    routes.extend(source::routes());
    routes.extend(definition::routes());
    routes.extend(norm::routes());
    routes.extend(txt_degr::routes());
    routes
}

/// Filter `column` on the array parameter `name`. Returns whether it was given.
pub(crate) fn filter_param(
    ctx: &mut QueryContext,
    name: &str,
    column: &str,
    matcher: Matcher,
) -> Result<bool, ApiError> {
    match ctx.consume_array(name)? {
        Some(values) => {
            ctx.filter(Predicate::compare(column, matcher(&values, name)?));
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Include an aggregate computed per row by a lateral subquery. The
/// subquery must produce one column named `val`.
pub(crate) fn lateral_include(ctx: &mut QueryContext, alias: &str, subquery: SelectQuery) {
    ctx.ensure_join(Join::left_lateral(subquery, alias));
    ctx.select_expr(&format!("coalesce({}.val, '{{}}') as {}", alias, alias));
}

/// `select 1 from <table> where <table>.<fk> = <outer>`, the start of an
/// EXISTS filter.
pub(crate) fn correlated(table: &str, inner: &str, outer: &str) -> SelectQuery {
    SelectQuery::from(table)
        .select_raw("1")
        .filter(Predicate::columns_eq(inner, outer))
}

pub(crate) fn lang_code_matcher(values: &[Value], _name: &str) -> Result<Comparison, ApiError> {
    crate::predicate::matchers::lang_code(values)
}

pub(crate) fn lang_code_langvar_matcher(
    values: &[Value],
    _name: &str,
) -> Result<Comparison, ApiError> {
    crate::predicate::matchers::lang_code_langvar(values)
}

/// Drop repeated values, keeping the first occurrence of each.
pub(crate) fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !unique.contains(&v) {
            unique.push(v);
        }
    }
    unique
}

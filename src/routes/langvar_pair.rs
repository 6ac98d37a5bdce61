//! Translation quality between pairs of language varieties.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::predicate::validate;
use crate::query_builder::{SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::{Execution, PathParams, Route, RouteHandler, RouteSpec};
use crate::server::query_context::QueryContext;
use crate::server::AppState;

const PAIRS_MAX: usize = 500;

pub struct LangvarPair;

/// A single pair may be passed flat (`ids=1&ids=2`).
fn pair_list(ctx: &mut QueryContext, name: &str) -> Result<Vec<Value>, ApiError> {
    let Some(items) = ctx.consume_array(name)? else {
        return Ok(Vec::new());
    };
    match items.first() {
        Some(first) if !first.is_array() => Ok(vec![Value::Array(items)]),
        _ => Ok(items),
    }
}

/// `(a,b)` composite text of each pair.
fn composites<T: std::fmt::Display>(pairs: Vec<(T, T)>) -> Vec<String> {
    pairs
        .into_iter()
        .map(|(a, b)| format!("({},{})", a, b))
        .collect()
}

fn build(ctx: &mut QueryContext) -> Result<(), ApiError> {
    let ids = pair_list(ctx, "ids")?;
    let ids = validate::id_pairs(&ids, "ids")?;
    let uids = pair_list(ctx, "uids")?;
    let uids = validate::uid_pairs(&uids, "uids")?;

    match ids.len() + uids.len() {
        0 => {
            return Err(ApiError::MissingParameter(
                "you must pass at least one langvar pair under \"ids\" or \"uids\"".to_string(),
            ))
        }
        n if n > PAIRS_MAX => {
            return Err(ApiError::invalid(format!(
                "you cannot specify more than {} langvar pairs",
                PAIRS_MAX
            )))
        }
        _ => {}
    }

    ctx.query = SelectQuery::from_call(SqlFragment::new(
        "langvar_pair_match(?,?)",
        vec![
            SqlValue::TextArray(composites(ids)),
            SqlValue::TextArray(composites(uids)),
        ],
    ))
    .select_raw("langvar1")
    .select_raw("langvar2")
    .select_raw("max_quality_d1")
    .select_raw("max_quality_d2");
    ctx.set_response("resultType", Value::from("langvar_pair"));
    Ok(())
}

#[async_trait]
impl RouteHandler for LangvarPair {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        _path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        build(ctx)?;
        Ok(Execution::Listing)
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    vec![Route::new(
        RouteSpec {
            path: "/v2/langvar_pair",
            array_params: &["ids", "uids"],
            cacheable: true,
        },
        LangvarPair,
    )]
}

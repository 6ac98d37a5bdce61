//! The request pipeline every API route runs through.
//!
//! 1. parse the query string and merge a POST body over it
//! 2. coerce the route's array parameters
//! 3. serve a cached response when one exists
//! 4. parse `include`, `exclude` and `indent`
//! 5. run the route handler, which builds the query
//! 6. reject unknown parameters
//! 7. execute (or render `sql`, or echo the request)
//! 8. serialize, and cache successful responses

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, Request},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::ApiError;
use super::params;
use super::query_context::QueryContext;
use super::response_cache::{cached_query, fingerprint};
use super::storage::TempTableJob;
use super::{client_id, AppState};
use crate::predicate::validate;
use crate::query_builder::{CompiledQuery, SelectQuery};

pub type PathParams = HashMap<String, String>;

/// Turns the rows of deferred work into response fields.
pub type Finish =
    Box<dyn FnOnce(Vec<Value>, &mut Map<String, Value>) -> Result<(), ApiError> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct RouteSpec {
    pub path: &'static str,
    /// Parameters coerced to arrays before the handler runs.
    pub array_params: &'static [&'static str],
    pub cacheable: bool,
}

pub enum Work {
    Query(CompiledQuery),
    Transaction(TempTableJob),
}

/// What the pipeline runs once the handler has built its query.
pub enum Execution {
    /// Run `ctx.query`; rows go under `result`.
    Listing,
    /// Run `ctx.query`, a `count_of` wrapper; the count goes under `count`.
    Count { count_type: &'static str },
    /// Run `ctx.query`; the first row goes under `key`.
    Single { key: &'static str, not_found: String },
    Deferred { work: Work, finish: Finish },
    /// The handler filled in the response itself.
    Done,
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        path: &PathParams,
        app: &AppState,
    ) -> Result<Execution, ApiError>;

    /// Adjust each result row before it is sent.
    fn transform(&self, _row: &mut Value) {}
}

pub struct Route {
    pub spec: RouteSpec,
    pub handler: Box<dyn RouteHandler>,
}

impl Route {
    pub fn new(spec: RouteSpec, handler: impl RouteHandler + 'static) -> Arc<Self> {
        Arc::new(Route {
            spec,
            handler: Box::new(handler),
        })
    }
}

/// Run `route` for one request and log the outcome.
pub async fn dispatch(app: Arc<AppState>, route: Arc<Route>, req: Request) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = match run(&app, &route, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    let elapsed = started.elapsed().as_millis();
    let status = response.status();
    if status.is_success() {
        log::info!("[{}] {} {} {} {}ms", request_id, method, uri, status.as_u16(), elapsed);
    } else {
        log::warn!("[{}] {} {} {} {}ms", request_id, method, uri, status.as_u16(), elapsed);
    }
    response
}

async fn run(app: &AppState, route: &Route, req: Request) -> Result<Response, ApiError> {
    let client = client_id(&req);
    let (mut parts, body) = req.into_parts();

    let path_params = parts
        .extract::<Path<PathParams>>()
        .await
        .map(|Path(p)| p)
        .unwrap_or_default();

    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| ApiError::invalid(format!("invalid query string: {}", e)))?;
    let mut request_params = params::from_query_pairs(pairs);

    if parts.method == Method::POST {
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ApiError::InvalidContent(e.to_string()))?;
        params::merge_body(&mut request_params, &bytes)?;
    }

    params::coerce_arrays(&mut request_params, route.spec.array_params);
    params::reject_nul(&request_params)?;
    let path_values: Map<String, Value> = path_params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    params::reject_nul(&path_values)?;

    let flag = |name: &str| -> Result<Option<bool>, ApiError> {
        request_params
            .get(name)
            .map(|v| validate::boolean(v, name))
            .transpose()
    };
    let echo = flag("echo")?.unwrap_or(false);
    let use_cache = flag("cache")?.unwrap_or(true);
    let echoed = echo.then(|| {
        serde_json::json!({
            "url": parts.uri.to_string(),
            "query": Value::Object(request_params.clone()),
        })
    });

    let cache_key = use_cache
        .then(|| cache_key(app, route, &parts.uri, &client, &request_params))
        .flatten();
    if let Some(key) = &cache_key {
        if let Some(payload) = app.cache.get(key) {
            log::debug!("cache hit for {}", parts.uri.path());
            let mut response = json_response(payload);
            response
                .headers_mut()
                .insert("x-cache", HeaderValue::from_static("hit"));
            return Ok(response);
        }
        log::debug!("cache miss for {}", parts.uri.path());
    }

    let mut ctx = QueryContext::new(request_params, app.limits());
    ctx.init_state(app.config.development)?;

    let execution = route.handler.handle(&mut ctx, &path_params, app).await?;
    ctx.check_unknown_params()?;

    match echoed {
        Some(request) => ctx.set_response("request", request),
        None => execute(app, route, &mut ctx, execution).await?,
    }

    let payload = serialize(&ctx.response, ctx.state.json_indent)?;
    if let Some(key) = cache_key.filter(|_| !echo) {
        app.cache.insert(key, payload.clone());
    }
    Ok(json_response(payload))
}

/// Fingerprint of a cacheable request, or `None` when the cache is bypassed.
fn cache_key(
    app: &AppState,
    route: &Route,
    uri: &axum::http::Uri,
    client: &str,
    request_params: &Map<String, Value>,
) -> Option<String> {
    if !route.spec.cacheable || !app.cache.is_enabled() {
        return None;
    }
    if let Some(Value::Array(sort)) = request_params.get("sort") {
        if sort.first().and_then(Value::as_str) == Some("random") {
            return None;
        }
    }

    let query = cached_query(request_params, app.config.response_max);
    Some(fingerprint(uri.path(), client, &query))
}

async fn execute(
    app: &AppState,
    route: &Route,
    ctx: &mut QueryContext,
    execution: Execution,
) -> Result<(), ApiError> {
    match execution {
        Execution::Listing => {
            if ctx.state.sql_debug {
                let sql = ctx.query.to_string();
                ctx.set_response("sql", Value::String(sql));
                return Ok(());
            }

            let mut rows = app.executor.fetch_all(&ctx.query.compile()).await?;
            for row in rows.iter_mut() {
                route.handler.transform(row);
            }
            let result_num = rows.len();
            ctx.set_response("result", Value::Array(rows));
            ctx.set_response("resultNum", Value::from(result_num));
            ctx.set_response("resultMax", Value::from(ctx.limits.response_max));
        }
        Execution::Count { count_type } => {
            let row = app.executor.fetch_optional(&ctx.query.compile()).await?;
            let count = row
                .as_ref()
                .and_then(|r| r.get("count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            ctx.set_response("count", Value::from(count));
            ctx.set_response("countType", Value::from(count_type));
        }
        Execution::Single { key, not_found } => {
            let query = std::mem::replace(&mut ctx.query, SelectQuery::from(""));
            let mut row = app
                .executor
                .fetch_optional(&query.limit(1).compile())
                .await?
                .ok_or(ApiError::NotFound(not_found))?;
            route.handler.transform(&mut row);
            ctx.set_response(key, row);
        }
        Execution::Deferred { work, finish } => {
            let rows = match work {
                Work::Query(query) => app.executor.fetch_all(&query).await?,
                Work::Transaction(job) => app.executor.run_in_transaction(&job).await?,
            };
            finish(rows, &mut ctx.response)?;
        }
        Execution::Done => {}
    }
    Ok(())
}

fn serialize(body: &Map<String, Value>, indent: bool) -> Result<String, ApiError> {
    if !indent {
        return serde_json::to_string(body).map_err(|e| ApiError::Internal(e.to_string()));
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    body.serialize(&mut ser)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| ApiError::Internal(e.to_string()))
}

fn json_response(payload: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_indents_four_spaces() {
        let body = json!({ "count": 3 }).as_object().cloned().unwrap();
        assert_eq!(serialize(&body, false).unwrap(), "{\"count\":3}");
        assert_eq!(serialize(&body, true).unwrap(), "{\n    \"count\": 3\n}");
    }

    #[test]
    fn test_json_response_content_type() {
        let response = json_response("{}".to_string());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}

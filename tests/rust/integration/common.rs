use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use lexiquery::config::ServerConfig;
use lexiquery::query_builder::CompiledQuery;
use lexiquery::server::storage::{QueryExecutor, StorageError, TempTableJob};
use lexiquery::server::{build_router, AppState};
use serde_json::Value;
use tower::ServiceExt;

/// Canned rows keyed by a substring of the SQL they answer.
type Responder = (String, Vec<Value>);

/// Records every query and answers from canned rows.
#[derive(Default)]
pub struct RecordingExecutor {
    pub queries: Mutex<Vec<CompiledQuery>>,
    pub jobs: Mutex<Vec<TempTableJob>>,
    responders: Vec<Responder>,
    fail: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries whose SQL contains `needle` with `rows`. The first
    /// matching responder wins.
    pub fn respond(mut self, needle: &str, rows: Vec<Value>) -> Self {
        self.responders.push((needle.to_string(), rows));
        self
    }

    pub fn failing() -> Self {
        RecordingExecutor {
            fail: true,
            ..Self::default()
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn last_query(&self) -> CompiledQuery {
        self.queries
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no query was executed")
    }

    fn rows_for(&self, sql: &str) -> Result<Vec<Value>, StorageError> {
        if self.fail {
            return Err(StorageError::Decode("connection reset".to_string()));
        }
        Ok(self
            .responders
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn fetch_all(&self, query: &CompiledQuery) -> Result<Vec<Value>, StorageError> {
        self.queries.lock().unwrap().push(query.clone());
        self.rows_for(&query.sql)
    }

    async fn run_in_transaction(&self, job: &TempTableJob) -> Result<Vec<Value>, StorageError> {
        self.jobs.lock().unwrap().push(job.clone());
        self.rows_for(&job.query.sql)
    }
}

pub fn app_with(executor: Arc<RecordingExecutor>) -> Router {
    app_with_config(executor, ServerConfig::default())
}

pub fn app_with_config(executor: Arc<RecordingExecutor>, config: ServerConfig) -> Router {
    build_router(Arc::new(AppState::new(config, executor)))
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Status and parsed body in one step.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = get(app, uri).await;
    let status = response.status();
    (status, body_json(response).await)
}

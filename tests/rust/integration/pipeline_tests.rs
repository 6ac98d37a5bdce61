use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use lexiquery::config::ServerConfig;
use serde_json::json;
use tower::ServiceExt;

use super::common::{app_with, app_with_config, body_json, get, get_json, RecordingExecutor};

#[tokio::test]
async fn test_unknown_parameters_are_reported_together() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) =
        get_json(&app, "/v2/langvar?zeta=1&alpha=2&include=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "the following parameters are unknown or incompatible with your query: alpha, zeta; \
         the following include items are unknown or incompatible with your query: bogus"
    );
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_second_identical_request_is_a_cache_hit() {
    let executor = Arc::new(
        RecordingExecutor::new().respond("from meaning", vec![json!({ "id": 3 })]),
    );
    let app = app_with(executor.clone());

    let first = get(&app, "/v2/meaning?id=3").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-cache").is_none());
    let first_body = body_json(first).await;

    let second = get(&app, "/v2/meaning?id=3").await;
    assert_eq!(second.headers()["x-cache"], "hit");
    assert_eq!(body_json(second).await, first_body);
    assert_eq!(executor.query_count(), 1);
}

#[tokio::test]
async fn test_cache_false_and_random_sort_bypass_the_cache() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    for _ in 0..2 {
        let response = get(&app, "/v2/meaning?id=3&cache=false").await;
        assert!(response.headers().get("x-cache").is_none());
    }
    for _ in 0..2 {
        get(&app, "/v2/langvar?sort=random").await;
    }
    assert_eq!(executor.query_count(), 4);
}

#[tokio::test]
async fn test_invalid_cache_flag_is_rejected_before_lookup() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());
    get(&app, "/v2/meaning?id=3").await;

    let response = get(&app, "/v2/meaning?id=3&cache=yes").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get("x-cache").is_none());
    assert_eq!(
        body_json(response).await["message"],
        "the parameter \"cache\" must be boolean: \"yes\""
    );
    assert_eq!(executor.query_count(), 1);
}

#[tokio::test]
async fn test_disabled_cache_never_serves_hits() {
    let executor = Arc::new(RecordingExecutor::new());
    let config = ServerConfig {
        cache_enabled: false,
        ..ServerConfig::default()
    };
    let app = app_with_config(executor.clone(), config);

    get(&app, "/v2/meaning?id=3").await;
    get(&app, "/v2/meaning?id=3").await;
    assert_eq!(executor.query_count(), 2);
}

#[tokio::test]
async fn test_echo_returns_request_without_executing() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/expr?langvar=187&echo=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resultType"], "expr");
    assert_eq!(body["request"]["url"], "/v2/expr?langvar=187&echo=true");
    assert_eq!(body["request"]["query"]["langvar"], json!(["187"]));
    assert!(body.get("result").is_none());
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_sql_parameter_renders_query() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/denotation?meaning=5&sql=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["sql"],
        "select denotation.id, denotation.expr, denotation.meaning, denotation.source \
         from denotationx as denotation where denotation.meaning = 5 \
         order by denotation.id asc limit 2000"
    );
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_storage_failure_hides_detail() {
    let app = app_with(Arc::new(RecordingExecutor::failing()));

    let (status, body) = get_json(&app, "/v2/meaning?id=3").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "code": "Internal", "message": "unknown error" }));
}

#[tokio::test]
async fn test_nul_characters_are_rejected() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/expr?txt=a%00b&sql=true").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "the parameter \"txt\" cannot contain NUL characters");

    let (status, body) = get_json(&app, "/v2/source/a%00b").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "the parameter \"id\" cannot contain NUL characters");
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_non_object_body_is_rejected() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/meaning")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("[1, 2]"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "InvalidContent");
}

#[tokio::test]
async fn test_indent_pretty_prints() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let response = get(&app, "/v2/meaning?id=3&indent=true").await;
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("{\n    \"resultType\": \"meaning\""));
}

#[tokio::test]
async fn test_health_and_docs_redirect() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        ServerConfig::default().docs_url.as_str()
    );
}

async fn flush_from(app: &Router, peer: [u8; 4], forwarded: Option<&str>) -> Response {
    let mut builder = Request::builder()
        .uri("/v2/admin/flushcache")
        .extension(ConnectInfo(SocketAddr::from((peer, 40000))));
    if let Some(value) = forwarded {
        builder = builder.header("x-forwarded-for", value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_flush_cache_is_loopback_only() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());
    get(&app, "/v2/meaning?id=3").await;

    let remote = flush_from(&app, [203, 0, 113, 5], None).await;
    assert_eq!(remote.status(), StatusCode::FORBIDDEN);

    let local = flush_from(&app, [127, 0, 0, 1], None).await;
    assert_eq!(local.status(), StatusCode::OK);
    assert_eq!(body_json(local).await, json!({ "flushed": 1 }));

    get(&app, "/v2/meaning?id=3").await;
    assert_eq!(executor.query_count(), 2);
}

#[tokio::test]
async fn test_flush_cache_ignores_forwarded_loopback() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    for forwarded in ["127.0.0.1, 203.0.113.9", "127.0.0.1"] {
        let response = flush_from(&app, [203, 0, 113, 9], Some(forwarded)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    // no socket address at all
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/admin/flushcache")
                .header("x-forwarded-for", "127.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

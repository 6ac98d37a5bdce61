use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use lexiquery::config::ServerConfig;
use lexiquery::server::errors::RateLimitInfo;
use lexiquery::server::rate_limit::{Admission, AdmissionControl, Throttle};
use lexiquery::server::{build_router, AppState};
use mockall::mock;
use tower::ServiceExt;

use super::common::{body_json, RecordingExecutor};

mock! {
    pub Limiter {}

    impl AdmissionControl for Limiter {
        fn consume(&self, client_id: &str) -> Admission;
    }
}

fn throttled_app(limiter: MockLimiter) -> Router {
    let state = AppState::new(ServerConfig::default(), Arc::new(RecordingExecutor::new()))
        .with_throttle(Throttle::new(Arc::new(limiter), &["198.51.100.1".to_string()]));
    build_router(Arc::new(state))
}

async fn get_from(app: &Router, uri: &str, client: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_denied_client_gets_429_with_headers() {
    let mut limiter = MockLimiter::new();
    limiter
        .expect_consume()
        .withf(|client| client == "203.0.113.9")
        .times(1)
        .returning(|_| {
            Admission::Deny(RateLimitInfo {
                retry_after_ms: 2000,
                limit: 120,
                remaining: 0,
                reset_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            })
        });
    let app = throttled_app(limiter);

    let response = get_from(&app, "/v2/langvar", "203.0.113.9").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "2");
    assert_eq!(response.headers()["x-ratelimit-limit"], "120");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let reset = response.headers()["x-ratelimit-reset"].to_str().unwrap();
    assert_eq!(
        DateTime::parse_from_rfc2822(reset).unwrap(),
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    );

    let body = body_json(response).await;
    assert_eq!(body["code"], "TooManyRequests");
    assert_eq!(body["message"], "Rate limit of 120 requests/minute exceeded");
}

#[tokio::test]
async fn test_admitted_client_reaches_route() {
    let mut limiter = MockLimiter::new();
    limiter
        .expect_consume()
        .times(2)
        .returning(|_| Admission::Allow);
    let app = throttled_app(limiter);

    for _ in 0..2 {
        let response = get_from(&app, "/v2/langvar", "203.0.113.9").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_loopback_and_unlimited_clients_skip_the_limiter() {
    let mut limiter = MockLimiter::new();
    limiter.expect_consume().never();
    let app = throttled_app(limiter);

    for client in ["127.0.0.1", "::1", "198.51.100.1"] {
        let response = get_from(&app, "/health", client).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // no client identity at all
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_chain_starting_with_loopback_is_throttled() {
    let mut limiter = MockLimiter::new();
    limiter
        .expect_consume()
        .withf(|client| client == "127.0.0.1, 203.0.113.9")
        .times(1)
        .returning(|_| {
            Admission::Deny(RateLimitInfo {
                retry_after_ms: 1000,
                limit: 120,
                remaining: 0,
                reset_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            })
        });
    let app = throttled_app(limiter);

    let response = get_from(&app, "/v2/langvar", "127.0.0.1, 203.0.113.9").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use super::errors::ApiError;
use super::{peer_ip, AppState};

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "lexiquery",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 302 to the API documentation.
pub async fn docs_redirect(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(header::LOCATION, state.config.docs_url.clone())],
    )
}

/// Drop every cached response. Only callers connected over loopback are
/// allowed; forwarding headers are not consulted.
pub async fn flush_cache(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<impl IntoResponse, ApiError> {
    if !peer_ip(&req).is_some_and(|ip| ip.is_loopback()) {
        return Err(ApiError::NotAuthorized);
    }

    let metrics = state.cache.metrics();
    state.cache.clear();
    log::info!(
        "flushed response cache ({} entries, hit rate {:.2})",
        metrics.size,
        metrics.hit_rate()
    );
    Ok(Json(serde_json::json!({ "flushed": metrics.size })))
}

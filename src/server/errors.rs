use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::storage::StorageError;

/// Admission-denial metadata carried by a 429 response.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    pub retry_after_ms: u64,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    MissingParameter(String),

    #[error("{0}")]
    InvalidContent(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Rate limit of {} requests/minute exceeded", .0.limit)]
    RateLimited(RateLimitInfo),

    #[error("not authorized")]
    NotAuthorized,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidArgument(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_)
            | ApiError::MissingParameter(_)
            | ApiError::InvalidContent(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotAuthorized => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "InvalidArgument",
            ApiError::MissingParameter(_) => "MissingParameter",
            ApiError::InvalidContent(_) => "InvalidContent",
            ApiError::NotFound(_) => "ResourceNotFound",
            ApiError::RateLimited(_) => "TooManyRequests",
            ApiError::NotAuthorized => "NotAuthorized",
            ApiError::Internal(_) => "Internal",
        }
    }

    /// Message sent to the client. Internal details stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "unknown error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(detail) => log::error!("internal error: {}", detail),
            other => log::warn!("{} {}: {}", status.as_u16(), other.code(), other),
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.public_message(),
        };
        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited(info) = &self {
            let headers = response.headers_mut();
            let retry_secs = (info.retry_after_ms as f64 / 1000.0).to_string();
            let pairs = [
                ("retry-after", retry_secs),
                ("x-ratelimit-limit", info.limit.to_string()),
                ("x-ratelimit-remaining", info.remaining.to_string()),
                ("x-ratelimit-reset", info.reset_at.to_rfc2822()),
            ];
            for (name, value) in pairs {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
        }

        response
    }
}

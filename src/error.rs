//! Error types for the Bucketgate service.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::objects::ObjectStoreError;
use crate::ratelimit::Quota;
use crate::store::StoreError;

/// Main error type for Bucketgate operations.
///
/// Every variant maps to exactly one HTTP status. The client only ever sees the
/// generic message from [`GatewayError::public_message`]; backend detail stays in logs.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Empty, degenerate or otherwise malformed object key or body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong bearer token on an internal endpoint
    #[error("Unauthorized")]
    Unauthorized,

    /// Rejected by the admission filter
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Burst tier budget exhausted
    #[error("Burst limit exceeded")]
    BurstExceeded(Quota),

    /// Sustained tier budget exhausted
    #[error("Rate limit exceeded")]
    RateExceeded(Quota),

    /// Counter store unreachable while the limiter fails closed
    #[error("Rate limiter unavailable")]
    Unavailable,

    /// Counter store failure surfaced outside the limiter
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Object storage backend failure
    #[error("Storage backend error: {0}")]
    Backend(#[from] ObjectStoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BurstExceeded(_) | GatewayError::RateExceeded(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::StoreUnavailable(_)
            | GatewayError::Backend(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::Unauthorized => "Unauthorized".to_string(),
            GatewayError::Forbidden(_) => "Forbidden".to_string(),
            GatewayError::NotFound(_) => "Object not found".to_string(),
            GatewayError::BurstExceeded(_) => {
                "Too many requests in a short period. Slow down.".to_string()
            }
            GatewayError::RateExceeded(_) => "Rate limit exceeded. Try again later.".to_string(),
            GatewayError::Unavailable => "Service temporarily unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    fn quota(&self) -> Option<&Quota> {
        match self {
            GatewayError::BurstExceeded(quota) | GatewayError::RateExceeded(quota) => Some(quota),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let body = Json(serde_json::json!({ "error": self.public_message() }));
        let mut response = (status, body).into_response();

        if let Some(quota) = self.quota() {
            let headers = response.headers_mut();
            quota.write_headers(headers);
            headers.insert(
                "retry-after",
                HeaderValue::from(quota.reset_after_secs.max(1)),
            );
        }

        response
    }
}

/// Result type alias for Bucketgate operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Forbidden("bot".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NotFound("k".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Unavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Backend(ObjectStoreError::Io("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_detail_not_public() {
        let err = GatewayError::StoreUnavailable(StoreError::Unavailable(
            "redis://10.0.0.4 refused".into(),
        ));
        assert_eq!(err.public_message(), "Internal server error");
        assert!(err.to_string().contains("10.0.0.4"));
    }

    #[test]
    fn test_rate_limited_response_has_quota_headers() {
        let quota = Quota {
            limit: 100,
            remaining: 0,
            reset_at: chrono::Utc::now() + chrono::Duration::seconds(42),
            reset_after_secs: 42,
        };
        let response = GatewayError::RateExceeded(quota).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["ratelimit-limit"], "100");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "42");
        assert_eq!(headers["retry-after"], "42");
    }
}

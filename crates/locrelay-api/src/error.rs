//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use locrelay_core::FilterError;
use serde::Serialize;

use crate::upstream::RelayFailure;

/// API error type that converts to HTTP responses.
///
/// For the live stream only failures detected before the stream is opened
/// use it; once the response is an event stream, failures travel as
/// `error` events instead.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 404 Not Found
    NotFound(String),
    /// 502 Bad Gateway
    BadGateway(String),
    /// 503 Service Unavailable
    ServiceUnavailable(String),
    /// 504 Gateway Timeout
    GatewayTimeout(String),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::GatewayTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", msg)
            }
        };

        if status.is_server_error() {
            tracing::warn!(error = error_type, %message, "Upstream lookup failed");
        } else {
            tracing::debug!(error = error_type, %message, "API client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<RelayFailure> for ApiError {
    fn from(failure: RelayFailure) -> Self {
        match failure {
            RelayFailure::NotConfigured(msg) => ApiError::ServiceUnavailable(msg),
            RelayFailure::Timeout => ApiError::GatewayTimeout(RelayFailure::Timeout.to_string()),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_failure_status_mapping() {
        let cases = [
            (
                RelayFailure::NotConfigured("not configured".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (RelayFailure::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (RelayFailure::Status(401), StatusCode::BAD_GATEWAY),
            (RelayFailure::InvalidResponse, StatusCode::BAD_GATEWAY),
        ];

        for (failure, status) in cases {
            assert_eq!(ApiError::from(failure).into_response().status(), status);
        }
    }
}

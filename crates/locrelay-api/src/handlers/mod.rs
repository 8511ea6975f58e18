//! HTTP handlers for the relay

pub mod history;
pub mod live;
pub mod location;
pub mod users;

use axum::http::Uri;

use crate::error::ApiError;

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

//! Error types for subscriber operations

use locrelay_core::FilterError;
use thiserror::Error;

/// Result type alias for subscriber operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned synchronously to the caller.
///
/// Stream failures are never returned here; they show up in
/// [`LiveState::error`](crate::LiveState).
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filter rejected before opening a connection
    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for subscription filters and stream parsing

use thiserror::Error;

/// Result type for filter validation
pub type FilterResult<T> = Result<T, FilterError>;

/// Reasons a subscription filter is rejected before a stream is opened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// No `all=true`, `users` or `devices` selector
    #[error("At least one selector is required (all, users or devices)")]
    NoSelector,

    /// `limit` outside the accepted range
    #[error("limit must be between {min} and {max}, got {value}")]
    LimitOutOfRange { value: i64, min: u32, max: u32 },

    /// `heartbeat` must be a positive number of seconds
    #[error("heartbeat must be a positive number of seconds, got {0}")]
    InvalidHeartbeat(i64),

    /// A parameter could not be parsed
    #[error("Invalid value for '{param}': {value}")]
    InvalidValue { param: String, value: String },
}

/// Failures while parsing a `text/event-stream` body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    /// A single line or frame grew past the parser's size cap
    #[error("SSE frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

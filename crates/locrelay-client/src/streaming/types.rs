//! Types for the event source

use locrelay_core::{SseError, SseFrame};
use thiserror::Error;

/// Item produced by [`EventSource`](super::EventSource)
#[derive(Debug)]
pub enum SourceEvent {
    /// Response headers received; frames follow
    Open,
    /// One complete SSE frame
    Frame(SseFrame),
    /// The connection failed or ended; a reconnect may follow
    Error(StreamError),
}

/// Errors that can occur while streaming
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP/connection error
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Server rejected the request
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Stream was closed by the server
    #[error("Stream closed")]
    Closed,

    /// The body could not be parsed as an event stream
    #[error("Protocol error: {0}")]
    Protocol(#[from] SseError),
}

impl StreamError {
    /// Whether reconnecting cannot help.
    ///
    /// Client errors other than 408 and 429 are repeated verbatim on every
    /// attempt, so the source stops instead of retrying them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Server { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

//! Stream event names and the error payload

use serde::{Deserialize, Serialize};

/// Event name of a location sample
pub const POINT_EVENT: &str = "point";
/// Event name of a keep-alive with no data
pub const HEARTBEAT_EVENT: &str = "heartbeat";
/// Event name of a terminal failure
pub const ERROR_EVENT: &str = "error";

/// Fallback message when an `error` event carries none
pub const DEFAULT_ERROR_MESSAGE: &str = "Stream error";

/// Kind of a live stream event, derived from its SSE event name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Point,
    Heartbeat,
    Error,
    /// Any other name, including legacy `loc` / `no_change` / `bye`
    Other,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            POINT_EVENT => Self::Point,
            HEARTBEAT_EVENT => Self::Heartbeat,
            ERROR_EVENT => Self::Error,
            _ => Self::Other,
        }
    }
}

/// Payload of an `error` event: `{"error": "<message>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(alias = "message")]
    pub error: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Serialize to the wire form
    pub fn to_json(&self) -> String {
        serde_json::json!({ "error": self.error }).to_string()
    }

    /// Extract the message from an `error` event's data.
    ///
    /// Falls back to [`DEFAULT_ERROR_MESSAGE`] when the data is not an
    /// object with an `error` or `message` string.
    pub fn message_from(data: &str) -> String {
        serde_json::from_str::<ErrorPayload>(data)
            .map(|payload| payload.error)
            .ok()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
    }
}

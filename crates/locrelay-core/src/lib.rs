//! locrelay-core - Core types for the live location relay
//!
//! Shared between the relay server (`locrelay-api`) and the subscriber
//! (`locrelay-client`):
//!
//! - [`SubscriptionFilter`] with validation and query-string encoding
//! - [`LocationPoint`], the payload of a `point` event
//! - [`SseParser`], an incremental parser for `text/event-stream` bodies
//! - [`TrackableUser`], [`LocationData`] and [`RouteHistory`], the shapes
//!   served by the relay's JSON proxy endpoints

pub mod error;
pub mod models;
pub mod sse;

pub use error::{FilterError, FilterResult, SseError};
pub use models::*;
pub use sse::{SseFrame, SseParser, DEFAULT_MAX_FRAME_BYTES};

/// Path of the live location stream, relative to an API base URL.
///
/// Used for both the relay's public endpoint and the upstream provider's.
pub const LIVE_STREAM_PATH: &str = "/location/live/sse";

/// Provider endpoint listing users with location data
pub const USERS_PATH: &str = "/users.php";

/// Provider endpoint returning stored location rows, newest first
pub const LOCATIONS_PATH: &str = "/locations.php";

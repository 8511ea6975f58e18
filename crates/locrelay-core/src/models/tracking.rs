//! Snapshot shapes served by the JSON proxy endpoints
//!
//! The provider reports rows in its own layout; these types are what the
//! relay hands to browsers for the user list, the latest position and a
//! route history.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::point::LocationPoint;

/// Provider `server_time` layout, always UTC
pub const SERVER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rows requested for a route history when the caller gives no limit
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// A user that can be followed on the map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackableUser {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// One row of the provider's user listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUser {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TrackableUser {
    /// Status reported for every listed user
    pub const ACTIVE: &'static str = "active";

    /// Name is the display name, else the username, else the id
    pub fn from_provider(user: ProviderUser) -> Self {
        let id = match user.id {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let name = [user.display_name, user.username]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.clone());

        Self {
            id,
            name,
            status: Self::ACTIVE.to_string(),
        }
    }
}

/// Latest known position of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

impl LocationData {
    /// Build from a provider row; `user_id` is used when the row has none
    pub fn from_point(user_id: &str, point: &LocationPoint) -> Self {
        let user_id = match point.extra.get("user_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => user_id.to_string(),
        };

        Self {
            user_id,
            lat: point.latitude,
            lng: point.longitude,
            timestamp: received_at(point),
            speed: point.speed,
            heading: point.bearing,
        }
    }
}

/// A plain map coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Stored positions of one user; `timestamps[i]` belongs to `coordinates[i]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteHistory {
    pub user_id: String,
    pub coordinates: Vec<Coordinate>,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl RouteHistory {
    /// Empty history for `user_id`
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            coordinates: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Build from provider rows, keeping their order
    pub fn from_points(user_id: &str, points: &[LocationPoint]) -> Self {
        let (coordinates, timestamps) = points
            .iter()
            .map(|p| {
                (
                    Coordinate {
                        lat: p.latitude,
                        lng: p.longitude,
                    },
                    received_at(p),
                )
            })
            .unzip();

        Self {
            user_id: user_id.to_string(),
            coordinates,
            timestamps,
        }
    }
}

/// Parse a provider `server_time` value as UTC
pub fn parse_server_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), SERVER_TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Server receive time of a row, falling back to now
fn received_at(point: &LocationPoint) -> DateTime<Utc> {
    point
        .server_time
        .as_deref()
        .and_then(parse_server_time)
        .unwrap_or_else(Utc::now)
}

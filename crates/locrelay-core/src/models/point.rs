//! Location point: one reported position sample

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One position sample as carried by a `point` event.
///
/// Field names follow the provider's snake_case form; the short names it
/// uses in compact payloads (`user`, `lat`, `lon`, `timestamp`, ...) are
/// accepted too. When a payload carries several names for one field the
/// first in priority order wins and the others are kept in `extra`, like
/// any other unmodeled key. Numbers may arrive as JSON strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    pub latitude: f64,

    pub longitude: f64,

    /// Horizontal accuracy in meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// Altitude in meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    /// Speed in meters per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Bearing in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,

    /// Battery level, 0..1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,

    /// Device-side timestamp as reported upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,

    /// Server receive time (provider format, e.g. `2024-10-01 12:34:57`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,

    /// Server receive time in epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<i64>,

    /// Fields not modeled above, kept as received
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accepted names per field, highest priority first
const USER_NAME: &[&str] = &["user_name", "username", "userName", "user"];
const DEVICE_ID: &[&str] = &["device_id", "deviceId", "device"];
const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lon", "lng"];
const ACCURACY: &[&str] = &["accuracy"];
const ALTITUDE: &[&str] = &["altitude"];
const SPEED: &[&str] = &["speed", "speedMetersPerSecond"];
const BEARING: &[&str] = &["bearing", "bearingDegrees", "heading"];
const BATTERY_LEVEL: &[&str] = &["battery_level", "batteryLevel", "battery"];
const RECORDED_AT: &[&str] = &["recorded_at", "recordedAt"];
const SERVER_TIME: &[&str] = &["server_time", "serverTime"];
const SERVER_TIMESTAMP: &[&str] = &["server_timestamp", "serverTimestamp", "timestamp"];

/// Reasons a point payload is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl LocationPoint {
    /// Parse a `point` event payload
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Build a point from a decoded JSON object
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, PointError> {
        let latitude =
            take_f64(&mut map, LATITUDE)?.ok_or(PointError::MissingField("latitude"))?;
        let longitude =
            take_f64(&mut map, LONGITUDE)?.ok_or(PointError::MissingField("longitude"))?;

        Ok(Self {
            user_name: take_text(&mut map, USER_NAME)?,
            device_id: take_text(&mut map, DEVICE_ID)?,
            latitude,
            longitude,
            accuracy: take_f64(&mut map, ACCURACY)?,
            altitude: take_f64(&mut map, ALTITUDE)?,
            speed: take_f64(&mut map, SPEED)?,
            bearing: take_f64(&mut map, BEARING)?,
            battery_level: take_f64(&mut map, BATTERY_LEVEL)?,
            recorded_at: take_text(&mut map, RECORDED_AT)?,
            server_time: take_text(&mut map, SERVER_TIME)?,
            server_timestamp: take_i64(&mut map, SERVER_TIMESTAMP)?,
            extra: map,
        })
    }

    /// Identity of the reporting entity: user name, else device id
    pub fn entity(&self) -> Option<&str> {
        self.user_name.as_deref().or(self.device_id.as_deref())
    }
}

impl<'de> Deserialize<'de> for LocationPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(map).map_err(de::Error::custom)
    }
}

/// Remove the first usable entry among `names`.
///
/// Null and blank-string entries count as absent and are dropped.
fn take_field(
    map: &mut Map<String, Value>,
    names: &[&'static str],
) -> Option<(&'static str, Value)> {
    for &name in names {
        let absent = match map.get(name) {
            None => continue,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if absent {
            map.remove(name);
            continue;
        }
        return map.remove(name).map(|value| (name, value));
    }
    None
}

fn take_f64(
    map: &mut Map<String, Value>,
    names: &[&'static str],
) -> Result<Option<f64>, PointError> {
    let Some((field, value)) = take_field(map, names) else {
        return Ok(None);
    };
    let parsed = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| PointError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn take_i64(
    map: &mut Map<String, Value>,
    names: &[&'static str],
) -> Result<Option<i64>, PointError> {
    let Some((field, value)) = take_field(map, names) else {
        return Ok(None);
    };
    let parsed = match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| PointError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

/// Strings as-is; numbers and booleans kept as their JSON text
fn take_text(
    map: &mut Map<String, Value>,
    names: &[&'static str],
) -> Result<Option<String>, PointError> {
    match take_field(map, names) {
        None => Ok(None),
        Some((_, Value::String(s))) => Ok(Some(s)),
        Some((_, value @ (Value::Number(_) | Value::Bool(_)))) => Ok(Some(value.to_string())),
        Some((field, value)) => Err(PointError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

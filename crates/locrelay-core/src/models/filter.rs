//! Subscription filter: which users/devices a live stream should carry

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{FilterError, FilterResult};

/// Smallest accepted `limit` (points per cycle)
pub const MIN_POINT_LIMIT: u32 = 1;
/// Largest accepted `limit` (points per cycle)
pub const MAX_POINT_LIMIT: u32 = 500;

/// Query parameter names understood by the live stream endpoint
pub mod params {
    pub const ALL: &str = "all";
    pub const USERS: &str = "users";
    pub const DEVICES: &str = "devices";
    pub const SINCE: &str = "since";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const LIMIT: &str = "limit";
}

/// The set of entities a caller wants live location updates for.
///
/// A filter is fixed for the lifetime of one subscription: its query
/// parameters are sent in the request line, so changing the filter means
/// opening a new stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Subscribe to every entity the credential can see
    #[serde(default)]
    pub all: bool,
    /// User names to follow (repeatable `users` parameter)
    #[serde(default)]
    pub users: Vec<String>,
    /// Device identifiers to follow (repeatable `devices` parameter)
    #[serde(default)]
    pub devices: Vec<String>,
    /// Heartbeat interval in seconds (provider default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<u32>,
    /// Maximum points per cycle, 1..=500
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Resume point: epoch milliseconds or a previously seen event id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl SubscriptionFilter {
    /// Filter selecting every entity
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Filter selecting the given users
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Filter selecting the given devices
    pub fn devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a user to the selection
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.users.push(user.into());
        self
    }

    /// Add a device to the selection
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.devices.push(device.into());
        self
    }

    /// Set the heartbeat interval in seconds
    pub fn with_heartbeat(mut self, seconds: u32) -> Self {
        self.heartbeat = Some(seconds);
        self
    }

    /// Set the points-per-cycle limit
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the resume point
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    /// Whether at least one entity is selected
    pub fn has_selector(&self) -> bool {
        self.all
            || self.users.iter().any(|u| !u.is_empty())
            || self.devices.iter().any(|d| !d.is_empty())
    }

    /// Check the filter against the endpoint's constraints
    pub fn validate(&self) -> FilterResult<()> {
        if !self.has_selector() {
            return Err(FilterError::NoSelector);
        }

        if let Some(heartbeat) = self.heartbeat {
            if heartbeat == 0 {
                return Err(FilterError::InvalidHeartbeat(0));
            }
        }

        if let Some(limit) = self.limit {
            check_limit(i64::from(limit))?;
        }

        Ok(())
    }

    /// Encode as ordered query pairs.
    ///
    /// Repeatable parameters appear once per value, in insertion order.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        if self.all {
            pairs.push((params::ALL, "true".to_string()));
        }
        for user in &self.users {
            pairs.push((params::USERS, user.clone()));
        }
        for device in &self.devices {
            pairs.push((params::DEVICES, device.clone()));
        }
        if let Some(since) = &self.since {
            pairs.push((params::SINCE, since.clone()));
        }
        if let Some(heartbeat) = self.heartbeat {
            pairs.push((params::HEARTBEAT, heartbeat.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push((params::LIMIT, limit.to_string()));
        }

        pairs
    }

    /// Encode as an `application/x-www-form-urlencoded` query string
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.to_query_pairs() {
            serializer.append_pair(key, &value);
        }
        serializer.finish()
    }

    /// Copy of this filter resuming from `since`
    pub fn resumed_from(&self, since: impl Into<String>) -> Self {
        let mut filter = self.clone();
        filter.since = Some(since.into());
        filter
    }

    /// Parse a raw query string and validate the result
    pub fn from_query(query: &str) -> FilterResult<Self> {
        Self::from_query_pairs(form_urlencoded::parse(query.as_bytes()))
    }

    /// Build a filter from decoded query pairs and validate it.
    ///
    /// Unknown parameters are ignored.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> FilterResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();

        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                params::ALL => filter.all = parse_bool(params::ALL, value)?,
                params::USERS => filter.users.push(value.to_string()),
                params::DEVICES => filter.devices.push(value.to_string()),
                params::SINCE => filter.since = Some(value.to_string()),
                params::HEARTBEAT => {
                    let seconds = parse_int(params::HEARTBEAT, value)?;
                    if seconds <= 0 {
                        return Err(FilterError::InvalidHeartbeat(seconds));
                    }
                    filter.heartbeat = Some(u32::try_from(seconds).map_err(|_| {
                        FilterError::InvalidValue {
                            param: params::HEARTBEAT.to_string(),
                            value: value.to_string(),
                        }
                    })?);
                }
                params::LIMIT => {
                    let limit = parse_int(params::LIMIT, value)?;
                    check_limit(limit)?;
                    filter.limit = Some(limit as u32);
                }
                other => {
                    tracing::trace!(param = other, "Ignoring unknown filter parameter");
                }
            }
        }

        filter.validate()?;
        Ok(filter)
    }
}

fn check_limit(limit: i64) -> FilterResult<()> {
    if limit < i64::from(MIN_POINT_LIMIT) || limit > i64::from(MAX_POINT_LIMIT) {
        return Err(FilterError::LimitOutOfRange {
            value: limit,
            min: MIN_POINT_LIMIT,
            max: MAX_POINT_LIMIT,
        });
    }
    Ok(())
}

fn parse_int(param: &str, value: &str) -> FilterResult<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| FilterError::InvalidValue {
            param: param.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(param: &str, value: &str) -> FilterResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(FilterError::InvalidValue {
            param: param.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_string_matches_scenario() {
        let filter = SubscriptionFilter::users(["Adar"])
            .with_heartbeat(10)
            .with_limit(100);

        assert_eq!(filter.to_query_string(), "users=Adar&heartbeat=10&limit=100");
    }

    #[test]
    fn test_repeated_users_are_kept() {
        let filter = SubscriptionFilter::users(["Adar", "Noa", "Adar"]).with_device("dev-7");

        assert_eq!(
            filter.to_query_string(),
            "users=Adar&users=Noa&users=Adar&devices=dev-7"
        );
    }

    #[test]
    fn test_from_query_preserves_multiplicity() {
        let filter = SubscriptionFilter::from_query("users=a&users=b&devices=x&limit=5").unwrap();

        assert_eq!(filter.users, vec!["a", "b"]);
        assert_eq!(filter.devices, vec!["x"]);
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn test_limit_bounds() {
        assert!(SubscriptionFilter::from_query("all=true&limit=1").is_ok());
        assert!(SubscriptionFilter::from_query("all=true&limit=500").is_ok());

        assert_eq!(
            SubscriptionFilter::from_query("all=true&limit=0"),
            Err(FilterError::LimitOutOfRange {
                value: 0,
                min: 1,
                max: 500
            })
        );
        assert!(matches!(
            SubscriptionFilter::from_query("all=true&limit=501"),
            Err(FilterError::LimitOutOfRange { value: 501, .. })
        ));
        assert!(matches!(
            SubscriptionFilter::from_query("all=true&limit=-3"),
            Err(FilterError::LimitOutOfRange { value: -3, .. })
        ));
        assert!(SubscriptionFilter::all().with_limit(501).validate().is_err());
    }

    #[test]
    fn test_selector_required() {
        assert_eq!(
            SubscriptionFilter::from_query("heartbeat=10"),
            Err(FilterError::NoSelector)
        );
        assert_eq!(
            SubscriptionFilter::default().validate(),
            Err(FilterError::NoSelector)
        );
        assert_eq!(
            SubscriptionFilter::from_query("all=false&users="),
            Err(FilterError::NoSelector)
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            SubscriptionFilter::from_query("all=maybe"),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            SubscriptionFilter::from_query("all=true&limit=ten"),
            Err(FilterError::InvalidValue { .. })
        ));
        assert_eq!(
            SubscriptionFilter::from_query("all=true&heartbeat=0"),
            Err(FilterError::InvalidHeartbeat(0))
        );
    }

    #[test]
    fn test_unknown_params_ignored() {
        let filter = SubscriptionFilter::from_query("all=true&theme=dark").unwrap();
        assert!(filter.all);
    }

    #[test]
    fn test_resumed_from_replaces_since() {
        let filter = SubscriptionFilter::all().with_since("100");
        let resumed = filter.resumed_from("250");

        assert_eq!(resumed.since.as_deref(), Some("250"));
        assert_eq!(resumed.to_query_string(), "all=true&since=250");
    }
}

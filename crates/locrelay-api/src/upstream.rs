//! Client for the upstream location provider
//!
//! One long-lived request shape (the live event stream) and three JSON
//! lookups (user listing, latest location, route history), all carrying
//! the service credential.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use locrelay_core::{
    LocationData, LocationPoint, ProviderUser, RouteHistory, TrackableUser, LIVE_STREAM_PATH,
    LOCATIONS_PATH, USERS_PATH,
};

use crate::config::{ConfigError, UpstreamSettings};

/// Header carrying the service credential upstream
pub const API_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-api-token");
/// SSE resume header
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";

/// Why a relay ended.
///
/// The display text is what subscribers see in the terminal `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayFailure {
    /// Required server-side setting missing
    #[error("{0}")]
    NotConfigured(String),

    /// Upstream answered with a non-success status
    #[error("API returned {0}")]
    Status(u16),

    /// Connecting to or reading from upstream timed out
    #[error("Upstream request timed out")]
    Timeout,

    /// Upstream could not be reached
    #[error("Connection refused by location API")]
    ConnectionRefused,

    /// Any other transport failure
    #[error("Upstream connection lost")]
    Transport,

    /// Upstream ended the stream
    #[error("Upstream stream closed")]
    Closed,

    /// A JSON response did not have the expected shape
    #[error("Invalid response from location API")]
    InvalidResponse,
}

impl RelayFailure {
    /// Classify a reqwest error
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionRefused
        } else {
            Self::Transport
        }
    }
}

/// Filters for a route history lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    /// Maximum rows; the provider default applies when absent
    #[serde(default)]
    pub limit: Option<u32>,
    /// Lower bound, passed to the provider as given
    #[serde(default)]
    pub date_from: Option<String>,
    /// Upper bound, passed to the provider as given
    #[serde(default)]
    pub date_to: Option<String>,
}

/// `{"status": "success", "data": {"users": [...]}}`
#[derive(Debug, Deserialize)]
struct UsersEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<UsersData>,
}

#[derive(Debug, Deserialize)]
struct UsersData {
    #[serde(default)]
    users: Vec<ProviderUser>,
}

/// `{"success": true, "data": [...]}`
#[derive(Debug, Deserialize)]
struct LocationsEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<LocationPoint>>,
}

/// HTTP client bound to one upstream provider
#[derive(Debug)]
pub struct UpstreamClient {
    http: Client,
    base_url: Url,
    live_url: Url,
    bearer: HeaderValue,
    response_timeout: Duration,
    debug_mode: bool,
}

impl UpstreamClient {
    /// Create a client from validated settings.
    ///
    /// Only the connect timeout applies to every request; the live stream
    /// body is long-lived.
    pub fn new(settings: &UpstreamSettings, debug_mode: bool) -> Result<Self, ConfigError> {
        let mut token = HeaderValue::from_str(&settings.api_token)
            .map_err(|_| ConfigError::InvalidToken)?;
        token.set_sensitive(true);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_token))
            .map_err(|_| ConfigError::InvalidToken)?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_TOKEN_HEADER, token);

        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidBaseUrl {
                url: settings.base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            live_url: endpoint_url(&settings.base_url, LIVE_STREAM_PATH),
            bearer,
            response_timeout: settings.response_timeout,
            debug_mode,
        })
    }

    /// Create a client for `base_url` with `api_token` and default timeouts
    pub fn with_token(base_url: &str, api_token: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(&UpstreamSettings::new(base_url, api_token), false)
    }

    /// Upstream URL for a given inbound query string, forwarded verbatim
    pub fn request_url(&self, raw_query: Option<&str>) -> Url {
        let mut url = self.live_url.clone();
        url.set_query(raw_query.filter(|q| !q.is_empty()));
        url
    }

    /// Open the upstream live stream.
    ///
    /// Returns the response only for a success status; the body is left
    /// unread for the caller to relay.
    pub async fn open_live(
        &self,
        raw_query: Option<&str>,
        last_event_id: Option<&HeaderValue>,
    ) -> Result<Response, RelayFailure> {
        let url = self.request_url(raw_query);

        if self.debug_mode {
            debug!(%url, "Opening upstream live stream");
        } else {
            debug!("Opening upstream live stream");
        }

        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID, id.clone());
        }

        // Bounds the wait for response headers only, never the body
        let response = match tokio::time::timeout(self.response_timeout, send(request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.response_timeout, "Upstream live stream did not answer");
                return Err(RelayFailure::Timeout);
            }
        };

        let status = response.status();
        if !status.is_success() {
            if self.debug_mode {
                let body = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), %body, "Upstream rejected live stream");
            } else {
                warn!(status = status.as_u16(), "Upstream rejected live stream");
            }
            return Err(RelayFailure::Status(status.as_u16()));
        }

        info!(status = status.as_u16(), "Upstream live stream open");
        Ok(response)
    }

    /// Users with location data.
    ///
    /// A success envelope without users yields an empty list.
    pub async fn trackable_users(&self) -> Result<Vec<TrackableUser>, RelayFailure> {
        let envelope: UsersEnvelope = self
            .get_json(
                USERS_PATH,
                &[
                    ("with_location_data", "true"),
                    ("include_counts", "true"),
                    ("include_metadata", "true"),
                ],
            )
            .await?;

        if envelope.status.as_deref() != Some("success") {
            warn!(status = ?envelope.status, "Location API user listing not successful");
            return Err(RelayFailure::InvalidResponse);
        }

        let users: Vec<TrackableUser> = envelope
            .data
            .map(|d| d.users)
            .unwrap_or_default()
            .into_iter()
            .map(TrackableUser::from_provider)
            .collect();

        info!(count = users.len(), "Fetched users from location API");
        Ok(users)
    }

    /// Most recent stored position of `user_id`, if any
    pub async fn latest_location(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationData>, RelayFailure> {
        let rows = self
            .locations(&[("user", user_id), ("limit", "1"), ("offset", "0")])
            .await?;

        Ok(rows.first().map(|row| LocationData::from_point(user_id, row)))
    }

    /// Stored positions of `user_id` in provider order
    pub async fn route_history(
        &self,
        user_id: &str,
        query: &HistoryQuery,
    ) -> Result<RouteHistory, RelayFailure> {
        let limit = query
            .limit
            .unwrap_or(locrelay_core::DEFAULT_HISTORY_LIMIT)
            .to_string();

        let mut params = vec![("user", user_id), ("limit", limit.as_str()), ("offset", "0")];
        if let Some(from) = query.date_from.as_deref() {
            params.push(("date_from", from));
        }
        if let Some(to) = query.date_to.as_deref() {
            params.push(("date_to", to));
        }

        let rows = self.locations(&params).await?;
        info!(count = rows.len(), "Fetched route history from location API");

        Ok(RouteHistory::from_points(user_id, &rows))
    }

    /// Query the location rows endpoint
    async fn locations(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Vec<LocationPoint>, RelayFailure> {
        let envelope: LocationsEnvelope = self.get_json(LOCATIONS_PATH, params).await?;

        if !envelope.success {
            warn!("Location API location query not successful");
            return Err(RelayFailure::InvalidResponse);
        }
        Ok(envelope.data.unwrap_or_default())
    }

    /// Authenticated JSON GET against `<base><path>`
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RelayFailure> {
        let url = endpoint_url(&self.base_url, path);

        if self.debug_mode {
            debug!(%url, ?params, "Querying location API");
        } else {
            debug!(path, "Querying location API");
        }

        let request = self
            .http
            .get(url)
            .query(params)
            .header(AUTHORIZATION, self.bearer.clone())
            .header(ACCEPT, HeaderValue::from_static(JSON))
            .timeout(self.response_timeout);

        let response = send(request).await?;
        let status = response.status();
        if !status.is_success() {
            if self.debug_mode {
                let body = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), path, %body, "Location API error");
            } else {
                warn!(status = status.as_u16(), path, "Location API error");
            }
            return Err(RelayFailure::Status(status.as_u16()));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                warn!(path, "Location API response timed out");
                RelayFailure::Timeout
            } else {
                warn!(error = %e, path, "Unexpected location API response");
                RelayFailure::InvalidResponse
            }
        })
    }
}

/// Send a request, classifying transport failures
async fn send(request: RequestBuilder) -> Result<Response, RelayFailure> {
    request.send().await.map_err(|e| {
        let failure = RelayFailure::from_transport(&e);
        warn!(error = %e, %failure, "Upstream request failed");
        failure
    })
}

/// `<base><path>`, keeping any path prefix of the base URL
fn endpoint_url(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    let path = format!("{}{}", url.path().trim_end_matches('/'), path);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_url_keeps_prefix() {
        let client = UpstreamClient::with_token("https://loc.example.com/api/", "tok").unwrap();
        assert_eq!(
            client.request_url(None).as_str(),
            "https://loc.example.com/api/location/live/sse"
        );

        let client = UpstreamClient::with_token("https://loc.example.com", "tok").unwrap();
        assert_eq!(
            client.request_url(Some("")).as_str(),
            "https://loc.example.com/location/live/sse"
        );
    }

    #[test]
    fn test_query_forwarded_verbatim() {
        let client = UpstreamClient::with_token("https://loc.example.com/api", "tok").unwrap();
        let url = client.request_url(Some("users=Adar&users=Noa&heartbeat=10&limit=100"));

        assert_eq!(
            url.as_str(),
            "https://loc.example.com/api/location/live/sse?users=Adar&users=Noa&heartbeat=10&limit=100"
        );
    }

    #[test]
    fn test_endpoint_urls_share_prefix() {
        let base = Url::parse("https://loc.example.com/api/?x=1").unwrap();
        assert_eq!(
            endpoint_url(&base, USERS_PATH).as_str(),
            "https://loc.example.com/api/users.php"
        );
        assert_eq!(
            endpoint_url(&base, LOCATIONS_PATH).as_str(),
            "https://loc.example.com/api/locations.php"
        );
    }

    #[test]
    fn test_history_query_defaults() {
        let query: HistoryQuery = serde_json::from_str(r#"{"date_from":"2024-10-01"}"#).unwrap();
        assert_eq!(
            query,
            HistoryQuery {
                limit: None,
                date_from: Some("2024-10-01".into()),
                date_to: None,
            }
        );
    }

    #[test]
    fn test_invalid_token_rejected() {
        assert!(matches!(
            UpstreamClient::with_token("https://loc.example.com", "bad\ntoken"),
            Err(ConfigError::InvalidToken)
        ));
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(RelayFailure::Status(401).to_string(), "API returned 401");
        assert_eq!(RelayFailure::Closed.to_string(), "Upstream stream closed");
        assert_eq!(RelayFailure::Timeout.to_string(), "Upstream request timed out");
        assert_eq!(
            RelayFailure::InvalidResponse.to_string(),
            "Invalid response from location API"
        );
        assert_eq!(
            RelayFailure::NotConfigured("Location API credential is not configured".into())
                .to_string(),
            "Location API credential is not configured"
        );
    }
}

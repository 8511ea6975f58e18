//! Relay configuration
//!
//! Loaded once at startup from an optional TOML file, then overridden by
//! environment variables. The result is immutable: handlers receive the
//! validated [`UpstreamSettings`] through `AppState`, never by reading the
//! environment themselves.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Environment variable holding the upstream base URL
pub const ENV_BASE_URL: &str = "LOC_API_BASEURL";
/// Environment variable holding the upstream service credential
pub const ENV_API_TOKEN: &str = "LOC_API_TOKEN";
/// Environment variable with comma-separated CORS origins
pub const ENV_CORS_ORIGINS: &str = "CORS_ORIGINS";
/// Environment variable enabling verbose (sensitive) logging
pub const ENV_DEBUG_MODE: &str = "DEBUG_MODE";
/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "PORT";

/// Origins allowed when none are configured
pub const DEV_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://localhost:5173"];

const DEFAULT_PORT: u16 = 8001;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Location API base URL is not configured")]
    MissingBaseUrl,

    #[error("Location API credential is not configured")]
    MissingToken,

    #[error("Location API credential is not a valid header value")]
    InvalidToken,

    #[error("Invalid location API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// `[upstream]` section
#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the location provider API
    #[serde(default)]
    pub base_url: Option<String>,
    /// Service credential sent as `X-API-Token`
    #[serde(default)]
    pub api_token: Option<String>,
    /// Connect timeout for upstream requests
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Time allowed for upstream to answer: response headers for the live
    /// stream, the whole response for JSON requests
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("response_timeout_secs", &self.response_timeout_secs)
            .finish()
    }
}

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty means development defaults
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Log upstream URLs and response bodies (may contain user names)
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            debug_mode: false,
            upstream: UpstreamConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_response_timeout_secs() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECS
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = get(ENV_BASE_URL) {
            self.upstream.base_url = Some(base_url);
        }
        if let Some(token) = get(ENV_API_TOKEN) {
            self.upstream.api_token = Some(token);
        }
        if let Some(origins) = get(ENV_CORS_ORIGINS) {
            self.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(debug) = get(ENV_DEBUG_MODE) {
            self.debug_mode = debug.trim().eq_ignore_ascii_case("true");
        }
        if let Some(port) = get(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_PORT.to_string(),
                value: port.clone(),
            })?;
        }

        Ok(())
    }

    /// Validate the upstream section.
    ///
    /// Both the base URL and the credential are required.
    pub fn upstream_settings(&self) -> Result<UpstreamSettings, ConfigError> {
        let base_url = self
            .upstream
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;

        let api_token = self
            .upstream
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let parsed = Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "expected an http(s) URL".to_string(),
            });
        }

        Ok(UpstreamSettings {
            base_url: parsed,
            api_token: api_token.to_string(),
            connect_timeout: Duration::from_secs(self.upstream.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.upstream.response_timeout_secs),
        })
    }

    /// CORS origins to allow, with development defaults when none are set
    pub fn effective_cors_origins(&self) -> Vec<String> {
        if self.cors_origins.is_empty() {
            DEV_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()
        } else {
            self.cors_origins.clone()
        }
    }
}

/// Validated upstream settings
#[derive(Clone)]
pub struct UpstreamSettings {
    pub base_url: Url,
    pub api_token: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl UpstreamSettings {
    /// Settings for `base_url` with `api_token` and default timeouts
    pub fn new(base_url: Url, api_token: impl Into<String>) -> Self {
        Self {
            base_url,
            api_token: api_token.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            response_timeout: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

impl fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

//! Application state for the relay

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::{ConfigError, RelayConfig};
use crate::upstream::{RelayFailure, UpstreamClient};

/// Application state shared across all handlers.
///
/// Built once at startup and never mutated; concurrent relays share it
/// read-only.
#[derive(Clone)]
pub struct AppState {
    /// Upstream client, or the reason it could not be configured
    upstream: Result<Arc<UpstreamClient>, Arc<ConfigError>>,
    /// Allowed CORS origins (`*` allows any)
    cors_origins: Arc<Vec<String>>,
    /// Whether sensitive request details may be logged
    debug_mode: bool,
}

impl AppState {
    /// Create state around a configured upstream client
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream: Ok(Arc::new(upstream)),
            cors_origins: Arc::new(RelayConfig::default().effective_cors_origins()),
            debug_mode: false,
        }
    }

    /// Create state for a relay whose upstream is not configured.
    ///
    /// Every stream request is answered with a single `error` event.
    pub fn unconfigured(reason: ConfigError) -> Self {
        Self {
            upstream: Err(Arc::new(reason)),
            cors_origins: Arc::new(RelayConfig::default().effective_cors_origins()),
            debug_mode: false,
        }
    }

    /// Build state from a loaded configuration.
    ///
    /// A missing or invalid upstream section is logged, not fatal: the
    /// relay still starts and fails each stream request explicitly.
    pub fn from_config(config: &RelayConfig) -> Self {
        let upstream = config
            .upstream_settings()
            .and_then(|settings| UpstreamClient::new(&settings, config.debug_mode));

        let upstream = match upstream {
            Ok(client) => Ok(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "Location API unavailable; live streams will fail");
                Err(Arc::new(e))
            }
        };

        if config.cors_origins.is_empty() {
            warn!("CORS origins not set - using development defaults");
        } else if config.cors_origins.iter().any(|o| o == "*") {
            error!("CORS origins '*' is insecure! Specify allowed origins explicitly.");
        }

        if config.debug_mode {
            warn!("DEBUG MODE IS ENABLED - upstream URLs and responses will be logged");
        }

        Self {
            upstream,
            cors_origins: Arc::new(config.effective_cors_origins()),
            debug_mode: config.debug_mode,
        }
    }

    /// Override the allowed CORS origins
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Arc::new(origins);
        self
    }

    /// Get the upstream client, or the failure to report for this request
    pub fn upstream(&self) -> Result<&Arc<UpstreamClient>, RelayFailure> {
        self.upstream
            .as_ref()
            .map_err(|e| RelayFailure::NotConfigured(e.to_string()))
    }

    /// Allowed CORS origins
    pub fn cors_origins(&self) -> &[String] {
        &self.cors_origins
    }

    /// Whether sensitive request details may be logged
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

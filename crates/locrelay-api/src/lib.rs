//! locrelay-api - Live location stream relay
//!
//! Serves `GET /api/location/live/sse` to browsers and relays the upstream
//! provider's event stream, injecting the service credential server-side
//! so it never reaches the subscriber. The same credential backs three JSON
//! lookups: `/api/users`, `/api/location/{user_id}` and
//! `/api/history/{user_id}`.
//!
//! # Usage
//!
//! ```ignore
//! use locrelay_api::{config::RelayConfig, create_router, AppState};
//!
//! let mut config = RelayConfig::default();
//! config.apply_env()?;
//! let router = create_router(AppState::from_config(&config));
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;
pub mod upstream;

pub use error::ApiError;
pub use state::AppState;
pub use upstream::{HistoryQuery, RelayFailure, UpstreamClient};

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Public route of the live location stream
pub const LIVE_ROUTE: &str = "/api/location/live/sse";

/// Create the relay router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.cors_origins());

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Live location stream (SSE)
        .route(LIVE_ROUTE, get(handlers::live::stream_live))
        // Snapshot lookups
        .route("/api/users", get(handlers::users::list_users))
        .route("/api/location/{user_id}", get(handlers::location::latest_location))
        .route("/api/history/{user_id}", get(handlers::history::route_history))
        .fallback(handlers::not_found)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for browser subscribers: GET only, origins from configuration
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

//! Latest location of one user

use axum::extract::{Path, State};
use axum::Json;
use tracing::{debug, info};

use locrelay_core::LocationData;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/location/{user_id}
///
/// 404 when the provider has no stored position for the user.
pub async fn latest_location(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<LocationData>, ApiError> {
    let upstream = state.upstream()?;

    if state.debug_mode() {
        info!(%user_id, "Fetching latest location");
    } else {
        info!("Fetching latest location");
    }

    match upstream.latest_location(&user_id).await? {
        Some(location) => Ok(Json(location)),
        None => {
            debug!("No stored location");
            Err(ApiError::NotFound(format!("No location data for user {}", user_id)))
        }
    }
}

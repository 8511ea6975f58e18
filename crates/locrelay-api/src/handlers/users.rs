//! Trackable user listing

use axum::extract::State;
use axum::Json;
use tracing::info;

use locrelay_core::TrackableUser;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<TrackableUser>>, ApiError> {
    let users = state.upstream()?.trackable_users().await?;
    info!(count = users.len(), "Listing trackable users");
    Ok(Json(users))
}

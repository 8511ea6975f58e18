//! Route history of one user

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use tracing::info;

use locrelay_core::RouteHistory;

use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::HistoryQuery;

/// GET /api/history/{user_id}
///
/// Example: GET /api/history/12?limit=50&date_from=2024-10-01&date_to=2024-10-02
pub async fn route_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<RouteHistory>, ApiError> {
    let upstream = state.upstream()?;

    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if query.limit == Some(0) {
        return Err(ApiError::BadRequest("limit must be at least 1".into()));
    }

    if state.debug_mode() {
        info!(%user_id, ?query, "Fetching route history");
    } else {
        info!(
            limit = query.limit,
            bounded = query.date_from.is_some() || query.date_to.is_some(),
            "Fetching route history"
        );
    }

    let history = upstream.route_history(&user_id, &query).await?;
    Ok(Json(history))
}

//! Read-only stream endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::StreamId;
use stream_sync::{DashboardSnapshot, StreamView};

use crate::AppState;
use crate::error::ApiError;
use crate::table::Table;

/// GET /streams: All four views.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    Json(state.dashboard.snapshot())
}

/// GET /streams/{stream}: One view, records newest first.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
) -> Result<Json<StreamView>, ApiError> {
    let stream: StreamId = stream.parse()?;
    Ok(Json(state.dashboard.view(stream)))
}

/// GET /streams/{stream}/table: The view rendered as a dashboard panel.
pub async fn table(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
) -> Result<Json<Table>, ApiError> {
    let stream: StreamId = stream.parse()?;
    Ok(Json(Table::from_view(&state.dashboard.view(stream))))
}

//! Health and Prometheus endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use common::StreamId;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use stream_sync::SyncState;

use crate::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Serialize)]
pub struct HealthResponse {
    /// `"ok"` once every stream is live, `"degraded"` otherwise.
    pub status: &'static str,
    pub streams: BTreeMap<StreamId, SyncState>,
}

/// GET /health: Returns the sync state of every stream.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let streams: BTreeMap<StreamId, SyncState> = StreamId::ALL
        .into_iter()
        .map(|stream| (stream, state.dashboard.synchronizer(stream).state()))
        .collect();
    let status = if streams.values().all(|s| *s == SyncState::Live) {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse { status, streams })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}

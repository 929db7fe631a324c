//! Integration tests for the dashboard HTTP surface.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use backing_store::{InMemoryBackingStore, StreamId};
use dashboard::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use stream_sync::{DashboardAggregator, RetryPolicy, SyncConfig, SyncState};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn fast_config() -> SyncConfig {
    SyncConfig::new(
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10), 0.0)
            .with_attempt_timeout(Duration::from_secs(1)),
    )
}

async fn seeded_store() -> InMemoryBackingStore {
    let store = InMemoryBackingStore::new();
    store
        .seed(
            StreamId::Users,
            vec![json!({"id": 1, "name": "Ana", "card_uid": "A1", "role": "admin", "room_number": "101"})],
        )
        .await
        .unwrap();
    store
        .seed(
            StreamId::Attendance,
            vec![
                json!({"id": 3, "card_uid": "A1", "role": "admin", "check_in": "09:00", "check_out": null}),
                json!({"id": 5, "card_uid": "B2", "role": "student", "check_in": "09:05",
                       "check_out": "12:00", "duration": "2h55m"}),
            ],
        )
        .await
        .unwrap();
    store
}

/// Starts the aggregator and waits until every stream is live.
async fn setup(store: InMemoryBackingStore) -> (axum::Router, Arc<DashboardAggregator>) {
    let dashboard = Arc::new(DashboardAggregator::start(Arc::new(store), fast_config()));
    for stream in StreamId::ALL {
        let mut rx = dashboard.watch(stream);
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|v| v.state == SyncState::Live && v.epoch >= 1),
        )
        .await
        .expect("stream went live in time")
        .expect("synchronizer running");
    }

    let state = Arc::new(AppState {
        dashboard: Arc::clone(&dashboard),
    });
    (dashboard::create_app(state, get_metrics_handle()), dashboard)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_stream_states() {
    let (app, _dashboard) = setup(seeded_store().await).await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["streams"]["users"], "live");
    assert_eq!(json["streams"]["denied_access"], "live");
}

#[tokio::test]
async fn test_list_streams_returns_all_views() {
    let (app, _dashboard) = setup(seeded_store().await).await;

    let (status, json) = get_json(app, "/streams").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["users"]["records"][0]["name"], "Ana");
    assert_eq!(json["attendance"]["records"][0]["id"], 5);
    assert_eq!(json["attendance"]["records"][1]["id"], 3);
    assert_eq!(json["alerts"]["records"], json!([]));
    assert_eq!(json["denied_access"]["state"], "live");
}

#[tokio::test]
async fn test_get_single_stream() {
    let (app, _dashboard) = setup(seeded_store().await).await;

    let (status, json) = get_json(app, "/streams/attendance").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stream"], "attendance");
    assert_eq!(json["state"], "live");
    assert_eq!(json["epoch"], 1);
    assert_eq!(json["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_stream_is_not_found() {
    let (app, _dashboard) = setup(InMemoryBackingStore::new()).await;

    let (status, json) = get_json(app.clone(), "/streams/visitors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "unknown stream: visitors");

    let (status, _) = get_json(app, "/streams/visitors/table").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_attendance_table_fills_placeholders() {
    let (app, _dashboard) = setup(seeded_store().await).await;

    let (status, json) = get_json(app, "/streams/attendance/table").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Attendance");
    assert_eq!(
        json["headers"],
        json!(["UID", "Role", "Check-In", "Check-Out", "Duration"])
    );
    assert_eq!(
        json["rows"][0]["cells"],
        json!(["B2", "student", "09:05", "12:00", "2h55m"])
    );
    assert_eq!(
        json["rows"][1]["cells"],
        json!(["A1", "admin", "09:00", "Inside", "-"])
    );
}

#[tokio::test]
async fn test_live_insert_is_served() {
    let store = seeded_store().await;
    let (app, dashboard) = setup(store.clone()).await;

    store
        .insert(
            StreamId::Alerts,
            json!({"alert_message": "Door forced", "triggered_at": "10:15"}),
        )
        .await
        .unwrap();
    let mut rx = dashboard.watch(StreamId::Alerts);
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.len() == 1))
        .await
        .unwrap()
        .unwrap();

    let (status, json) = get_json(app, "/streams/alerts/table").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["rows"][0]["cells"], json!(["Door forced", "10:15"]));
}

#[tokio::test]
async fn test_views_are_closed_after_shutdown() {
    let (app, dashboard) = setup(seeded_store().await).await;

    dashboard.shutdown();

    let (status, json) = get_json(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["streams"]["attendance"], "closed");

    let (_, json) = get_json(app, "/streams/users").await;
    assert_eq!(json["state"], "closed");
    assert_eq!(json["records"][0]["name"], "Ana");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _dashboard) = setup(seeded_store().await).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

//! Read-only HTTP dashboard for the access-control streams.
//!
//! Serves the four synchronized views (users, attendance, alerts, denied
//! access) as JSON, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod table;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use backing_store::{BackingStore, InMemoryBackingStore, PostgresBackingStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use stream_sync::DashboardAggregator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::StartupError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub dashboard: Arc<DashboardAggregator>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/streams", get(routes::streams::list))
        .route("/streams/{stream}", get(routes::streams::get))
        .route("/streams/{stream}/table", get(routes::streams::table))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Opens the configured backing store.
///
/// With `DATABASE_URL` set this connects to Postgres and applies the
/// migrations; otherwise an empty in-memory store is used.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn BackingStore>, StartupError> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory backing store");
        return Ok(Arc::new(InMemoryBackingStore::new()));
    };

    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    let store = PostgresBackingStore::new(pool);
    store.run_migrations().await?;
    tracing::info!("connected to Postgres backing store");
    Ok(Arc::new(store))
}

/// Describes the synchronizer metrics so the exporter can publish help text.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "sync_events_applied_total",
        "Change events applied to a live view"
    );
    metrics::describe_counter!(
        "sync_events_buffered_total",
        "Change events buffered while the snapshot was loading"
    );
    metrics::describe_counter!(
        "sync_malformed_events_total",
        "Feed messages dropped because they could not be normalized"
    );
    metrics::describe_counter!(
        "sync_feed_epochs_total",
        "Change feed subscriptions established"
    );
    metrics::describe_counter!(
        "sync_snapshot_failures_total",
        "Failed snapshot read attempts"
    );
    metrics::describe_gauge!("sync_view_records", "Records in the published view");
    metrics::describe_counter!(
        "store_notifications_total",
        "Notifications received from Postgres LISTEN"
    );
}

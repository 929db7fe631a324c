//! Dashboard server entry point.

use std::sync::Arc;

use dashboard::AppState;
use dashboard::config::Config;
use stream_sync::DashboardAggregator;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    dashboard::describe_metrics();

    let store = dashboard::connect_store(&config)
        .await
        .expect("failed to open backing store");

    // Views fill in the background; the server answers with Loading until then.
    let aggregator = Arc::new(DashboardAggregator::start(store, config.sync.clone()));
    let state = Arc::new(AppState {
        dashboard: Arc::clone(&aggregator),
    });
    let app = dashboard::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting dashboard server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    aggregator.shutdown();
    tracing::info!("server shut down gracefully");
}

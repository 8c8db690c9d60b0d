//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemorySagaStore, PostgresSagaStore, SagaStore};
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<S: SagaStore + 'static>(config: Config, store: S, metrics_handle: PrometheusHandle) {
    let (state, services) = api::create_default_state(store, &config);
    tracing::info!(services = ?services.registry().names(), "downstream services registered");

    // Roll back anything a previous process left mid-flight.
    match state.orchestrator.recover_incomplete().await {
        Ok(recovered) if !recovered.is_empty() => {
            tracing::warn!(count = recovered.len(), "recovered interrupted sagas");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "saga recovery sweep failed"),
    }

    let cleanup = api::spawn_cleanup_task(
        Arc::clone(&state.orchestrator),
        config.cleanup_interval,
        config.saga_max_age,
    );

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    cleanup.abort();
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the saga store and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresSagaStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL saga store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::info!("using in-memory saga store");
            serve(config, InMemorySagaStore::new(), metrics_handle).await;
        }
    }
}

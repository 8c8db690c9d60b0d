//! HTTP service for saga orchestration.
//!
//! Exposes saga creation and execution, circuit breaker introspection, a
//! health check and Prometheus metrics. Downstream services are reached
//! through in-process demo channels; a deployment swaps in real transports by
//! registering other [`rpc::RpcChannel`] implementations.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use rpc::{InMemoryChannel, RpcInvoker, ServiceRegistry};
use saga::definitions::{FOLLOW_SERVICE, MEDIA_SERVICE, USER_SERVICE};
use saga::{SagaOrchestrator, SagaStore};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::MetricsState;
use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let invoker = state.orchestrator.invoker().clone();

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            invoker: invoker.clone(),
        });

    let invoker_router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/breakers", get(routes::breakers::list))
        .route("/breakers/{service}/{action}", get(routes::breakers::get))
        .with_state(invoker);

    Router::new()
        .route("/sagas", post(routes::sagas::create::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/sagas/{id}/execute", post(routes::sagas::execute::<S>))
        .with_state(state)
        .merge(invoker_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// In-process stand-ins for the user, media and follow services.
#[derive(Clone, Default)]
pub struct DemoServices {
    pub user: InMemoryChannel,
    pub media: InMemoryChannel,
    pub follow: InMemoryChannel,
}

impl DemoServices {
    /// Creates channels that acknowledge every action the predefined sagas use.
    pub fn new() -> Self {
        let services = Self::default();

        services
            .user
            .handle("createUser", |payload: Value| async move {
                Ok(json!({
                    "userId": uuid::Uuid::new_v4(),
                    "username": payload["username"],
                }))
            })
            .reply("deleteUser", json!({"deleted": true}))
            .reply("linkMedia", json!({"linked": true}))
            .reply("unlinkMedia", json!({"unlinked": true}))
            .reply("incrementFollowers", json!({"updated": true}))
            .reply("decrementFollowers", json!({"updated": true}));

        services
            .media
            .handle("uploadMedia", |payload: Value| async move {
                Ok(json!({"mediaId": payload["mediaId"], "stored": true}))
            })
            .handle("attachAvatar", |_| async {
                Ok(json!({"mediaId": uuid::Uuid::new_v4()}))
            })
            .reply("deleteMedia", json!({"deleted": true}));

        services
            .follow
            .handle("createFollow", |_| async {
                Ok(json!({"followId": uuid::Uuid::new_v4()}))
            })
            .reply("deleteFollow", json!({"deleted": true}));

        services
    }

    /// Registry routing each service name to its channel.
    pub fn registry(&self) -> ServiceRegistry {
        ServiceRegistry::new()
            .with(USER_SERVICE, Arc::new(self.user.clone()))
            .with(MEDIA_SERVICE, Arc::new(self.media.clone()))
            .with(FOLLOW_SERVICE, Arc::new(self.follow.clone()))
    }
}

/// Creates the application state over `store`, wired to demo services.
pub fn create_default_state<S: SagaStore + 'static>(
    store: S,
    config: &Config,
) -> (Arc<AppState<S>>, DemoServices) {
    let services = DemoServices::new();
    let invoker = Arc::new(RpcInvoker::with_config(
        services.registry(),
        config.registry_config(),
    ));
    let orchestrator = Arc::new(SagaOrchestrator::with_config(
        store,
        invoker,
        config.orchestrator_config(),
    ));

    (Arc::new(AppState { orchestrator }), services)
}

/// Periodically purges finished sagas older than `max_age`.
pub fn spawn_cleanup_task<S: SagaStore + 'static>(
    orchestrator: Arc<SagaOrchestrator<S>>,
    every: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match orchestrator.cleanup_old_sagas(max_age).await {
                Ok(removed) => tracing::debug!(removed, "saga cleanup finished"),
                Err(e) => tracing::error!(error = %e, "saga cleanup failed"),
            }
        }
    })
}

//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use rpc::RpcInvoker;

/// State for the scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub invoker: Arc<RpcInvoker>,
}

/// GET /metrics: Prometheus-formatted metrics.
///
/// Breaker gauges are refreshed from the invoker's snapshots on every scrape.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    let summary = state.invoker.summary();
    metrics::gauge!("rpc_breakers").set(summary.total as f64);
    metrics::gauge!("rpc_breakers_open").set(summary.open as f64);
    metrics::gauge!("rpc_breakers_half_open").set(summary.half_open as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}

//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use rpc::RpcInvoker;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: Vec<String>,
    pub open_breakers: usize,
}

/// GET /health: process liveness plus downstream breaker pressure.
///
/// Reports `degraded` while any breaker is open; still a 200, since the
/// process itself can serve.
pub async fn check(State(invoker): State<Arc<RpcInvoker>>) -> Json<HealthResponse> {
    let summary = invoker.summary();
    let status = if summary.open > 0 { "degraded" } else { "ok" };

    Json(HealthResponse {
        status,
        services: invoker
            .services()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        open_breakers: summary.open,
    })
}

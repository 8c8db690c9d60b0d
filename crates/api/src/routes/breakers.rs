//! Circuit breaker introspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use rpc::{BreakerSnapshot, BreakerSummary, RpcInvoker};
use serde::Serialize;

use crate::error::ApiError;

#[derive(Serialize)]
pub struct BreakersResponse {
    pub summary: BreakerSummary,
    pub breakers: Vec<BreakerSnapshot>,
}

/// GET /breakers: aggregate view plus one snapshot per key.
pub async fn list(State(invoker): State<Arc<RpcInvoker>>) -> Json<BreakersResponse> {
    Json(BreakersResponse {
        summary: invoker.summary(),
        breakers: invoker.snapshots(),
    })
}

/// GET /breakers/{service}/{action}: one breaker's snapshot.
pub async fn get(
    State(invoker): State<Arc<RpcInvoker>>,
    Path((service, action)): Path<(String, String)>,
) -> Result<Json<BreakerSnapshot>, ApiError> {
    invoker
        .snapshot(&service, &action)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No breaker for {service}.{action}")))
}

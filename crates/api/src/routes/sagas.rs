//! Saga creation, execution and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::SagaId;
use saga::{
    Compensation, RollbackReport, Saga, SagaOrchestrator, SagaStatus, SagaStep, SagaStore,
    SagaType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Shared application state accessible from saga handlers.
pub struct AppState<S: SagaStore> {
    pub orchestrator: Arc<SagaOrchestrator<S>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateSagaRequest {
    #[serde(rename = "type")]
    pub saga_type: SagaType,
    pub steps: Vec<StepRequest>,
}

#[derive(Deserialize)]
pub struct StepRequest {
    pub step_id: String,
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub compensation: Option<Compensation>,
}

impl From<StepRequest> for SagaStep {
    fn from(req: StepRequest) -> Self {
        let step = SagaStep::new(req.step_id, req.service, req.action).with_data(req.data);
        match req.compensation {
            Some(c) => step.with_compensation(c.action, c.data),
            None => step,
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaResponse {
    #[serde(flatten)]
    pub saga: Saga,
    /// Present once the saga has been rolled back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
}

impl From<Saga> for SagaResponse {
    fn from(saga: Saga) -> Self {
        let rollback = (saga.status() == SagaStatus::Compensated).then(|| saga.rollback_report());
        Self { saga, rollback }
    }
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub saga_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// -- Handlers --

/// POST /sagas: create a Pending saga.
#[tracing::instrument(skip(state, req), fields(saga_type = %req.saga_type))]
pub async fn create<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateSagaRequest>,
) -> Result<(StatusCode, Json<SagaResponse>), ApiError> {
    let steps = req.steps.into_iter().map(SagaStep::from).collect();
    let saga = state.orchestrator.create_saga(req.saga_type, steps).await?;

    Ok((StatusCode::CREATED, Json(saga.into())))
}

/// POST /sagas/{id}/execute: run a Pending saga to completion.
///
/// A failed step is still a 200; the body carries `success: false`.
#[tracing::instrument(skip(state))]
pub async fn execute<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let outcome = state.orchestrator.execute_saga(saga_id).await?;

    Ok(Json(ExecuteResponse {
        saga_id: saga_id.to_string(),
        success: outcome.success,
        error: outcome.error,
    }))
}

/// GET /sagas/{id}: current saga state.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state
        .orchestrator
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {saga_id} not found")))?;

    Ok(Json(saga.into()))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga ID: {e}")))
}

//! Saga steps and their compensations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SagaError;
use crate::state::StepStatus;

/// Service name meaning "performed by the orchestrating service itself".
///
/// Local steps are tracked for bookkeeping only; no remote call is made to
/// execute or compensate them.
pub const LOCAL_SERVICE: &str = "local";

/// Action (and its input) that semantically undoes a completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compensation {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// One ordered unit of work within a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    step_id: String,
    service: String,
    action: String,
    #[serde(default)]
    status: StepStatus,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    compensation: Option<Compensation>,
    #[serde(default)]
    compensation_error: Option<String>,
}

impl SagaStep {
    /// Creates a pending step sending `action` to `service`.
    pub fn new(
        step_id: impl Into<String>,
        service: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service: service.into(),
            action: action.into(),
            status: StepStatus::Pending,
            data: Value::Null,
            result: None,
            error: None,
            compensation: None,
            compensation_error: None,
        }
    }

    /// Creates a pending step performed locally by the orchestrating service.
    pub fn local(step_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(step_id, LOCAL_SERVICE, action)
    }

    /// Sets the step's input payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Makes the step compensable by `action` with `data`.
    pub fn with_compensation(mut self, action: impl Into<String>, data: Value) -> Self {
        self.compensation = Some(Compensation {
            action: action.into(),
            data,
        });
        self
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Reply of a successful remote execution.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Failure reason, set when the step failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn compensation(&self) -> Option<&Compensation> {
        self.compensation.as_ref()
    }

    /// Reason the compensating call failed, if it did.
    pub fn compensation_error(&self) -> Option<&str> {
        self.compensation_error.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.service == LOCAL_SERVICE
    }

    pub fn is_compensable(&self) -> bool {
        self.compensation.is_some()
    }

    pub(crate) fn complete(&mut self, result: Option<Value>) -> Result<(), SagaError> {
        self.transition(StepStatus::Completed)?;
        self.result = result;
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) -> Result<(), SagaError> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub(crate) fn mark_compensated(&mut self) -> Result<(), SagaError> {
        self.transition(StepStatus::Compensated)?;
        self.compensation_error = None;
        Ok(())
    }

    pub(crate) fn record_compensation_failure(&mut self, error: impl Into<String>) {
        self.compensation_error = Some(error.into());
    }

    fn transition(&mut self, next: StepStatus) -> Result<(), SagaError> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidStepTransition {
                step_id: self.step_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

//! Saga instance and its lifecycle transitions.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SagaError;
use crate::state::{SagaStatus, StepStatus};
use crate::step::SagaStep;

/// Kind of saga, used for classification and metric labels only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaType {
    UserCreation,
    MediaUpload,
    FollowCreation,
}

impl SagaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaType::UserCreation => "user_creation",
            SagaType::MediaUpload => "media_upload",
            SagaType::FollowCreation => "follow_creation",
        }
    }
}

impl std::fmt::Display for SagaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_creation" => Ok(SagaType::UserCreation),
            "media_upload" => Ok(SagaType::MediaUpload),
            "follow_creation" => Ok(SagaType::FollowCreation),
            other => Err(format!("unknown saga type '{other}'")),
        }
    }
}

/// A multi-step operation with reverse-order compensation.
///
/// The step list is fixed at creation. Every transition touches `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    id: SagaId,
    saga_type: SagaType,
    status: SagaStatus,
    steps: Vec<SagaStep>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    error: Option<String>,
}

impl Saga {
    /// Creates a pending saga with a fresh ID.
    ///
    /// Rejects an empty step list and duplicate step IDs.
    pub fn new(saga_type: SagaType, steps: Vec<SagaStep>) -> Result<Self, SagaError> {
        if steps.is_empty() {
            return Err(SagaError::EmptySaga);
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.step_id()) {
                return Err(SagaError::DuplicateStepId(step.step_id().to_string()));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: SagaId::new(),
            saga_type,
            status: SagaStatus::Pending,
            steps,
            created_at: now,
            updated_at: now,
            error: None,
        })
    }

    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn saga_type(&self) -> SagaType {
        self.saga_type
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.step_id() == step_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Error of the step that failed the saga.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Indexes of completed steps, in execution order.
    pub fn completed_step_indexes(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status() == StepStatus::Completed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Summarizes which completed steps were actually rolled back.
    pub fn rollback_report(&self) -> RollbackReport {
        let mut report = RollbackReport::default();
        for step in &self.steps {
            match step.status() {
                StepStatus::Compensated => report.compensated.push(step.step_id().to_string()),
                StepStatus::Completed if step.compensation_error().is_some() => {
                    report.failed.push(step.step_id().to_string())
                }
                StepStatus::Completed => report.not_compensable.push(step.step_id().to_string()),
                StepStatus::Pending | StepStatus::Failed => {}
            }
        }
        report
    }

    /// True when the saga rolled back and no compensation failed.
    pub fn is_fully_compensated(&self) -> bool {
        self.status == SagaStatus::Compensated && self.rollback_report().failed.is_empty()
    }

    pub(crate) fn start(&mut self) -> Result<(), SagaError> {
        self.transition(SagaStatus::InProgress)
    }

    pub(crate) fn complete(&mut self) -> Result<(), SagaError> {
        self.transition(SagaStatus::Completed)
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) -> Result<(), SagaError> {
        self.transition(SagaStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Enters the compensation pass. A saga already compensating stays put,
    /// so an interrupted pass can be resumed.
    pub(crate) fn begin_compensation(&mut self) -> Result<(), SagaError> {
        if self.status == SagaStatus::Compensating {
            return Ok(());
        }
        self.transition(SagaStatus::Compensating)
    }

    pub(crate) fn finish_compensation(&mut self) -> Result<(), SagaError> {
        self.transition(SagaStatus::Compensated)
    }

    pub(crate) fn complete_step(
        &mut self,
        index: usize,
        result: Option<Value>,
    ) -> Result<(), SagaError> {
        self.steps[index].complete(result)?;
        self.touch();
        Ok(())
    }

    pub(crate) fn fail_step(&mut self, index: usize, error: impl Into<String>) -> Result<(), SagaError> {
        self.steps[index].fail(error)?;
        self.touch();
        Ok(())
    }

    pub(crate) fn compensate_step(&mut self, index: usize) -> Result<(), SagaError> {
        self.steps[index].mark_compensated()?;
        self.touch();
        Ok(())
    }

    pub(crate) fn record_compensation_failure(&mut self, index: usize, error: impl Into<String>) {
        self.steps[index].record_compensation_failure(error);
        self.touch();
    }

    fn transition(&mut self, next: SagaStatus) -> Result<(), SagaError> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Which completed steps a compensation pass undid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Steps whose compensation succeeded.
    pub compensated: Vec<String>,
    /// Steps whose compensating call failed.
    pub failed: Vec<String>,
    /// Completed steps left as-is because they have no compensation.
    pub not_compensable: Vec<String>,
}

/// Result of executing a saga. The only externally observed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SagaOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

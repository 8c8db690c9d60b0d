//! Saga error types.

use common::SagaId;
use rpc::InvokerError;
use thiserror::Error;

use crate::state::{SagaStatus, StepStatus};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga exists with this ID.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The saga is already being executed by this process.
    #[error("Saga {0} is already executing")]
    AlreadyRunning(SagaId),

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaStatus },

    /// A saga status change that the state machine does not allow.
    #[error("Invalid saga transition from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    /// A step status change that the state machine does not allow.
    #[error("Invalid transition for step '{step_id}' from {from} to {to}")]
    InvalidStepTransition {
        step_id: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// Two steps share the same ID.
    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    /// A saga must have at least one step.
    #[error("Saga has no steps")]
    EmptySaga,

    /// A step names a service with no registered channel.
    #[error("Step '{step_id}' targets unknown service '{service}'")]
    UnknownService { step_id: String, service: String },

    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by a [`crate::SagaStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A saga with this ID was already inserted.
    #[error("Saga already exists: {0}")]
    AlreadyExists(SagaId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a saga.
    #[error("Corrupt saga record: {0}")]
    Corrupt(String),
}

/// A forward step failed. Becomes the step's and the saga's error message.
#[derive(Debug, Error)]
#[error("Saga step '{step_id}' failed: {source}")]
pub struct StepExecutionError {
    pub step_id: String,
    #[source]
    pub source: InvokerError,
}

/// A compensating call failed. Logged and recorded on the step, never propagated.
#[derive(Debug, Error)]
#[error("Compensation step '{step_id}' failed: {source}")]
pub struct CompensationError {
    pub step_id: String,
    #[source]
    pub source: InvokerError,
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

//! Saga orchestration over circuit-breaker-guarded RPC.
//!
//! A saga is a fixed, ordered list of steps, each sending an action to a
//! service. The [`SagaOrchestrator`] runs the steps one at a time through the
//! shared [`rpc::RpcInvoker`]. When a step fails, every step completed before
//! it is compensated in reverse order:
//!
//! ```text
//! Pending ──► InProgress ──┬──► Completed
//!                          └──► Failed ──► Compensating ──► Compensated
//! ```
//!
//! Sagas are kept in an injectable [`SagaStore`]. The in-memory store is the
//! default; [`PostgresSagaStore`] lets [`SagaOrchestrator::recover_incomplete`]
//! roll back sagas interrupted by a crash.

pub mod definitions;
pub mod error;
pub mod orchestrator;
pub mod saga;
pub mod state;
pub mod step;
pub mod store;

pub use definitions::SagaDefinition;
pub use error::{CompensationError, Result, SagaError, StepExecutionError, StoreError};
pub use orchestrator::{OrchestratorConfig, SagaOrchestrator};
pub use saga::{RollbackReport, Saga, SagaOutcome, SagaType};
pub use state::{SagaStatus, StepStatus};
pub use step::{Compensation, LOCAL_SERVICE, SagaStep};
pub use store::{InMemorySagaStore, PostgresSagaStore, SagaStore, StoreResult};

//! Shared types for the saga orchestration services.

pub mod payload;
pub mod types;

pub use payload::{SAGA_ID_FIELD, with_saga_id};
pub use types::SagaId;

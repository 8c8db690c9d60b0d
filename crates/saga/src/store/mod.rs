//! Saga persistence.
//!
//! The orchestrator is the only writer: it inserts a saga once at creation and
//! saves it after every transition, so a store always holds the latest state.

mod memory;
mod postgres;

pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;

use async_trait::async_trait;
use common::SagaId;

use crate::error::StoreError;
use crate::saga::Saga;
use crate::state::SagaStatus;

/// Convenience type alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Table of sagas by ID.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Stores a new saga.
    ///
    /// Fails with `AlreadyExists` if the ID is taken.
    async fn insert(&self, saga: &Saga) -> StoreResult<()>;

    /// Writes the saga's current state, replacing what was stored.
    async fn save(&self, saga: &Saga) -> StoreResult<()>;

    /// Loads a saga by ID.
    async fn get(&self, id: SagaId) -> StoreResult<Option<Saga>>;

    /// Removes a saga. Returns whether it existed.
    async fn delete(&self, id: SagaId) -> StoreResult<bool>;

    /// Loads every stored saga, oldest first.
    async fn list(&self) -> StoreResult<Vec<Saga>>;

    /// Loads every saga in one of `statuses`, oldest first.
    async fn list_by_status(&self, statuses: &[SagaStatus]) -> StoreResult<Vec<Saga>> {
        let sagas = self.list().await?;
        Ok(sagas
            .into_iter()
            .filter(|s| statuses.contains(&s.status()))
            .collect())
    }
}

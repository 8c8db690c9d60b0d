use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use tokio::sync::RwLock;

use super::{SagaStore, StoreResult};
use crate::error::StoreError;
use crate::saga::Saga;

/// In-memory saga store, the default.
///
/// Sagas live only as long as the process.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, Saga>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sagas.
    pub async fn len(&self) -> usize {
        self.sagas.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sagas.read().await.is_empty()
    }

    /// Removes every saga.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, saga: &Saga) -> StoreResult<()> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&saga.id()) {
            return Err(StoreError::AlreadyExists(saga.id()));
        }
        sagas.insert(saga.id(), saga.clone());
        Ok(())
    }

    async fn save(&self, saga: &Saga) -> StoreResult<()> {
        self.sagas.write().await.insert(saga.id(), saga.clone());
        Ok(())
    }

    async fn get(&self, id: SagaId) -> StoreResult<Option<Saga>> {
        Ok(self.sagas.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: SagaId) -> StoreResult<bool> {
        Ok(self.sagas.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut all: Vec<_> = sagas.values().cloned().collect();
        all.sort_by_key(|s| s.created_at());
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::SagaType;
    use crate::state::SagaStatus;
    use crate::step::SagaStep;

    fn make_saga() -> Saga {
        Saga::new(
            SagaType::FollowCreation,
            vec![SagaStep::new("s1", "follow", "createFollow")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemorySagaStore::new();
        let saga = make_saga();
        store.insert(&saga).await.unwrap();

        assert_eq!(store.get(saga.id()).await.unwrap(), Some(saga));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_twice_fails() {
        let store = InMemorySagaStore::new();
        let saga = make_saga();
        store.insert(&saga).await.unwrap();

        let err = store.insert(&saga).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == saga.id()));
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = InMemorySagaStore::new();
        let mut saga = make_saga();
        store.insert(&saga).await.unwrap();

        saga.start().unwrap();
        store.save(&saga).await.unwrap();

        let loaded = store.get(saga.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), SagaStatus::InProgress);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemorySagaStore::new();
        let saga = make_saga();
        store.insert(&saga).await.unwrap();

        assert!(store.delete(saga.id()).await.unwrap());
        assert!(!store.delete(saga.id()).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = InMemorySagaStore::new();
        let pending = make_saga();
        let mut running = make_saga();
        running.start().unwrap();
        store.insert(&pending).await.unwrap();
        store.insert(&running).await.unwrap();

        let found = store
            .list_by_status(&[SagaStatus::InProgress])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), running.id());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}

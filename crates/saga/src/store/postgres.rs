use async_trait::async_trait;
use common::SagaId;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{SagaStore, StoreResult};
use crate::error::StoreError;
use crate::saga::Saga;
use crate::state::SagaStatus;

/// PostgreSQL-backed saga store.
///
/// Each saga is one row; the full saga, steps included, is kept in the `body`
/// column and upserted on every save. `status` and the timestamps are
/// duplicated into columns for filtering.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_saga(row: PgRow) -> StoreResult<Saga> {
        let body: serde_json::Value = row.try_get("body")?;
        let saga: Saga = serde_json::from_value(body)?;

        let id: uuid::Uuid = row.try_get("id")?;
        if saga.id().as_uuid() != id {
            return Err(StoreError::Corrupt(format!(
                "row {id} holds saga {}",
                saga.id()
            )));
        }
        Ok(saga)
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, saga: &Saga) -> StoreResult<()> {
        let body = serde_json::to_value(saga)?;

        sqlx::query(
            r#"
            INSERT INTO sagas (id, saga_type, status, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(saga.saga_type().as_str())
        .bind(saga.status().as_str())
        .bind(body)
        .bind(saga.created_at())
        .bind(saga.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::AlreadyExists(saga.id());
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn save(&self, saga: &Saga) -> StoreResult<()> {
        let body = serde_json::to_value(saga)?;

        sqlx::query(
            r#"
            INSERT INTO sagas (id, saga_type, status, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(saga.saga_type().as_str())
        .bind(saga.status().as_str())
        .bind(body)
        .bind(saga.created_at())
        .bind(saga.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: SagaId) -> StoreResult<Option<Saga>> {
        let row = sqlx::query("SELECT id, body FROM sagas WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn delete(&self, id: SagaId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sagas WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> StoreResult<Vec<Saga>> {
        let rows = sqlx::query("SELECT id, body FROM sagas ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn list_by_status(&self, statuses: &[SagaStatus]) -> StoreResult<Vec<Saga>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, body FROM sagas
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&statuses[..])
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }
}

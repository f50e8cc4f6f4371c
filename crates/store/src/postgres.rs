use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{Entity, EntityId, Result, StoreError, repository::Repository};

const UNIQUE_KEY_CONSTRAINT: &str = "unique_entity_key";

/// PostgreSQL-backed repository.
///
/// All entity types share the `entities` table, partitioned by aggregate
/// type. The body column holds the serialized entity.
pub struct PostgresRepository<E> {
    pool: PgPool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PostgresRepository<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> PostgresRepository<E> {
    /// Creates a new PostgreSQL repository.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn not_found(id: &EntityId) -> StoreError {
        StoreError::NotFound {
            aggregate_type: E::aggregate_type(),
            id: id.clone(),
        }
    }

    fn map_write_error(entity: &E, e: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some(UNIQUE_KEY_CONSTRAINT)
        {
            return StoreError::Conflict {
                aggregate_type: E::aggregate_type(),
                key: entity.unique_key().unwrap_or_default(),
            };
        }
        StoreError::Database(e)
    }

    async fn fetch_row(&self, id: &EntityId, active_only: bool) -> Result<E> {
        let row = sqlx::query(
            r#"
            SELECT body FROM entities
            WHERE aggregate_type = $1 AND id = $2 AND (active OR NOT $3)
            "#,
        )
        .bind(E::aggregate_type())
        .bind(id.as_str())
        .bind(active_only)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::not_found(id))?;

        let body: serde_json::Value = row.try_get("body")?;
        Ok(serde_json::from_value(body)?)
    }

    /// Flips the soft-delete marker of a row currently in state `from_active`.
    async fn set_active(&self, id: &EntityId, from_active: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT body FROM entities
            WHERE aggregate_type = $1 AND id = $2 AND active = $3
            FOR UPDATE
            "#,
        )
        .bind(E::aggregate_type())
        .bind(id.as_str())
        .bind(from_active)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Self::not_found(id))?;

        let body: serde_json::Value = row.try_get("body")?;
        let mut entity: E = serde_json::from_value(body)?;
        entity.set_active(!from_active);
        entity.touch();

        sqlx::query(
            r#"
            UPDATE entities SET active = $3, body = $4, updated_at = $5
            WHERE aggregate_type = $1 AND id = $2
            "#,
        )
        .bind(E::aggregate_type())
        .bind(id.as_str())
        .bind(!from_active)
        .bind(serde_json::to_value(&entity)?)
        .bind(entity.updated_at())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for PostgresRepository<E> {
    #[tracing::instrument(skip(self, entity), fields(aggregate = E::aggregate_type(), id = %entity.id()))]
    async fn save(&self, entity: &E) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (aggregate_type, id, unique_key, active, body, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregate_type, id) DO UPDATE
            SET unique_key = EXCLUDED.unique_key,
                active = EXCLUDED.active,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(E::aggregate_type())
        .bind(entity.id().as_str())
        .bind(entity.unique_key())
        .bind(entity.is_active())
        .bind(serde_json::to_value(entity)?)
        .bind(entity.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(entity, e))?;

        Ok(())
    }

    async fn fetch_by_id(&self, id: &EntityId) -> Result<E> {
        self.fetch_row(id, true).await
    }

    async fn fetch_snapshot(&self, id: &EntityId) -> Result<E> {
        self.fetch_row(id, false).await
    }

    #[tracing::instrument(skip(self, entity), fields(aggregate = E::aggregate_type(), id = %entity.id()))]
    async fn replace(&self, entity: &E) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET unique_key = $3, active = $4, body = $5, updated_at = $6
            WHERE aggregate_type = $1 AND id = $2
            "#,
        )
        .bind(E::aggregate_type())
        .bind(entity.id().as_str())
        .bind(entity.unique_key())
        .bind(entity.is_active())
        .bind(serde_json::to_value(entity)?)
        .bind(entity.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(entity, e))?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(entity.id()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(aggregate = E::aggregate_type()))]
    async fn remove(&self, id: &EntityId) -> Result<()> {
        self.set_active(id, true).await
    }

    #[tracing::instrument(skip(self), fields(aggregate = E::aggregate_type()))]
    async fn restore(&self, id: &EntityId) -> Result<()> {
        self.set_active(id, false).await
    }

    #[tracing::instrument(skip(self), fields(aggregate = E::aggregate_type()))]
    async fn hard_remove(&self, id: &EntityId) -> Result<()> {
        let result = sqlx::query("DELETE FROM entities WHERE aggregate_type = $1 AND id = $2")
            .bind(E::aggregate_type())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

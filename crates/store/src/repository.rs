use async_trait::async_trait;

use crate::{Entity, EntityId, Result};

/// Core trait for entity repositories.
///
/// All implementations must be thread-safe (Send + Sync) and must not add a
/// process-level lock of their own; concurrency control belongs to the
/// backing store.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Inserts the entity, or overwrites the row with the same id.
    ///
    /// Fails with `Conflict` if a different row holds the same unique key.
    async fn save(&self, entity: &E) -> Result<()>;

    /// Fetches a live (active) entity.
    ///
    /// Soft-deleted rows are reported as `NotFound`.
    async fn fetch_by_id(&self, id: &EntityId) -> Result<E>;

    /// Fetches an entity regardless of its soft-delete marker.
    ///
    /// Used to capture pre-images before irreversible operations.
    async fn fetch_snapshot(&self, id: &EntityId) -> Result<E>;

    /// Overwrites an existing row.
    async fn replace(&self, entity: &E) -> Result<()>;

    /// Soft-deletes a live row.
    async fn remove(&self, id: &EntityId) -> Result<()>;

    /// Reactivates a soft-deleted row.
    async fn restore(&self, id: &EntityId) -> Result<()>;

    /// Erases the row permanently.
    async fn hard_remove(&self, id: &EntityId) -> Result<()>;
}

/// Extension trait providing convenience methods for repositories.
#[async_trait]
pub trait RepositoryExt<E: Entity>: Repository<E> {
    /// Checks if a live entity exists.
    async fn exists(&self, id: &EntityId) -> Result<bool> {
        match self.fetch_by_id(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetches a live entity, mapping `NotFound` to `None`.
    async fn find(&self, id: &EntityId) -> Result<Option<E>> {
        match self.fetch_by_id(id).await {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// Blanket implementation for all Repository implementations
impl<E: Entity, T: Repository<E> + ?Sized> RepositoryExt<E> for T {}

#[async_trait]
impl<E: Entity, R: Repository<E> + ?Sized> Repository<E> for std::sync::Arc<R> {
    async fn save(&self, entity: &E) -> Result<()> {
        (**self).save(entity).await
    }

    async fn fetch_by_id(&self, id: &EntityId) -> Result<E> {
        (**self).fetch_by_id(id).await
    }

    async fn fetch_snapshot(&self, id: &EntityId) -> Result<E> {
        (**self).fetch_snapshot(id).await
    }

    async fn replace(&self, entity: &E) -> Result<()> {
        (**self).replace(entity).await
    }

    async fn remove(&self, id: &EntityId) -> Result<()> {
        (**self).remove(id).await
    }

    async fn restore(&self, id: &EntityId) -> Result<()> {
        (**self).restore(id).await
    }

    async fn hard_remove(&self, id: &EntityId) -> Result<()> {
        (**self).hard_remove(id).await
    }
}

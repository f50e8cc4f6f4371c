use async_trait::async_trait;

use crate::Result;

/// Byte payload storage keyed by object name and service scope.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes (or overwrites) the payload stored under `scope/key`.
    async fn store(&self, key: &str, scope: &str, content: &[u8]) -> Result<()>;

    /// Deletes the payload stored under `scope/key`.
    ///
    /// Deleting a missing payload is not an error.
    async fn delete(&self, key: &str, scope: &str) -> Result<()>;

    /// Reads the payload stored under `scope/key`.
    async fn fetch(&self, key: &str, scope: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<O: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<O> {
    async fn store(&self, key: &str, scope: &str, content: &[u8]) -> Result<()> {
        (**self).store(key, scope, content).await
    }

    async fn delete(&self, key: &str, scope: &str) -> Result<()> {
        (**self).delete(key, scope).await
    }

    async fn fetch(&self, key: &str, scope: &str) -> Result<Vec<u8>> {
        (**self).fetch(key, scope).await
    }
}

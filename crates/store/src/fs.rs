//! Filesystem-backed object store for single-node deployments and tests.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::{Result, StoreError, object::ObjectStore};

/// Stores payloads as files under `<base>/<scope>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    /// Creates the store, creating the base directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, key: &str, scope: &str) -> Result<PathBuf> {
        for part in [scope, key] {
            let mut components = Path::new(part).components();
            let single_normal = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !single_normal {
                return Err(StoreError::Unavailable(format!(
                    "invalid object path segment: {part:?}"
                )));
            }
        }
        Ok(self.base_path.join(scope).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[tracing::instrument(skip(self, content), fields(size = content.len()))]
    async fn store(&self, key: &str, scope: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve_path(key, scope)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str, scope: &str) -> Result<()> {
        let path = self.resolve_path(key, scope)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, key: &str, scope: &str) -> Result<Vec<u8>> {
        let path = self.resolve_path(key, scope)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                key: key.to_string(),
                scope: scope.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

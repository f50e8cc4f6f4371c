//! Durable store adapters consumed by the saga layer.
//!
//! Two contracts live here:
//! - [`Repository`]: row store with soft delete, restore and hard delete
//! - [`ObjectStore`]: byte payloads keyed by name and service scope
//!
//! In-memory adapters double as test fakes: they journal every call and can be
//! told to fail a given operation.

pub mod error;
pub mod fs;
pub mod memory;
pub mod object;
pub mod postgres;
pub mod repository;

pub use common::{Entity, EntityId};
pub use error::{Result, StoreError};
pub use fs::LocalObjectStore;
pub use memory::{InMemoryObjectStore, InMemoryRepository, ObjectCall, ObjectOp, RepoCall, RepoOp};
pub use object::ObjectStore;
pub use postgres::PostgresRepository;
pub use repository::{Repository, RepositoryExt};

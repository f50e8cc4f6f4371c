//! Domain layer for the entity services.
//!
//! This crate provides the concrete entities the saga layer coordinates:
//! - `Blob`: binary object descriptor with scope-dependent validation rules
//! - `Category`: taxonomy entry with a unique, title-cased name
//!
//! Raw aggregates (`BlobAggregate`, `CategoryAggregate`) are the untyped
//! transport inputs; converting them runs the entity validator.

pub mod blob;
pub mod category;

pub use blob::{BLOB_FAILED, BLOB_REMOVED, BLOB_UPLOADED, Blob, BlobAggregate, StorageLocation};
pub use category::{Category, CategoryAggregate, CategoryPatch};
pub use common::{Entity, EntityId, Lifecycle, Service, ValidationError};

//! Binary object descriptors and their validation rules.

mod aggregate;
mod entity;
pub mod rules;

use common::Service;

pub use aggregate::BlobAggregate;
pub use entity::{Blob, StorageLocation};

/// Emitted once a blob payload and descriptor are stored.
pub const BLOB_UPLOADED: &str = "BLOB_UPLOADED";
/// Emitted once a blob is erased.
pub const BLOB_REMOVED: &str = "BLOB_REMOVED";
/// Consumed: a downstream service rejected an uploaded blob.
pub const BLOB_FAILED: &str = "BLOB_FAILED";

/// Topic the consumers of `service` blobs report rejected uploads on,
/// e.g. `MEDIA_BLOB_FAILED`.
pub fn failed_topic(service: Service) -> String {
    format!("{}_{BLOB_FAILED}", service.as_str().to_uppercase())
}

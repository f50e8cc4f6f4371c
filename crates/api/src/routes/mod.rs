pub mod blobs;
pub mod categories;
pub mod health;
pub mod metrics;

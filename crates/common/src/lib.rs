//! Shared types for the entity services.
//!
//! Every service (blob, category, identity, ...) agrees on how entity ids are
//! shaped, what an entity must expose to the saga layer, and how validation
//! failures are described.

pub mod entity;
pub mod types;
pub mod validation;

pub use entity::{Entity, Lifecycle};
pub use types::{EntityId, Service};
pub use validation::ValidationError;

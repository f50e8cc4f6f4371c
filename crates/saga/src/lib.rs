//! Saga pattern implementation for entity lifecycle operations.
//!
//! Each mutating operation is an ordered sequence of local writes followed by
//! one event publish:
//! 1. Validate the input
//! 2. Write the object store and/or repository
//! 3. Publish the lifecycle event through a circuit breaker
//!
//! If the publish fails, the writes are undone with their inverse commands,
//! at most once. The verifier answers cross-service "do these ids exist"
//! requests with exactly one outcome event.

pub mod blob;
pub mod command;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod state;
pub mod verifier;

pub use blob::{Rollback, blob_id};
pub use command::{Command, SagaStep};
pub use coordinator::{SagaConfig, SagaCoordinator, SagaOutcome};
pub use dispatch::PublishFailure;
pub use error::{ErrorKind, Result, SagaError};
pub use state::{Operation, SagaReport, SagaState};
pub use verifier::{SagaVerifier, VerifyOutcome, verify_topic};

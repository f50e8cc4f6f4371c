//! Event transport for the entity services.
//!
//! This crate provides:
//! - `Event`, `Transaction` and the wire `Message` with its metadata envelope
//! - `Broker`: transport contract, plus `InMemoryBroker` with ack/nack
//! - `CircuitBreaker` and a per-`(aggregate, action)` registry
//! - `EventPublisher`: one call per entity lifecycle step

pub mod breaker;
pub mod broker;
pub mod error;
pub mod event;
pub mod message;
pub mod publisher;
pub mod transaction;

pub use breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, Counts,
};
pub use broker::{AckKind, Broker, Delivery, InMemoryBroker, Settlement, Subscription};
pub use error::{EventBusError, Result};
pub use event::{Event, EventKind, Priority, Provider};
pub use message::{Message, keys};
pub use publisher::{BrokerEventPublisher, EventPublisher};
pub use transaction::Transaction;

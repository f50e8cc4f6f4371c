//! Entity lifecycle event publisher.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Entity, EntityId, Lifecycle};

use crate::{
    breaker::CircuitBreakerRegistry,
    broker::Broker,
    error::Result,
    event::{Event, EventKind, Priority, Provider},
    message::Message,
    transaction::Transaction,
};

/// Publishes one event per entity lifecycle step.
///
/// Every call passes through the circuit breaker of its
/// `(aggregate, action)` pair.
#[async_trait]
pub trait EventPublisher<E: Entity>: Send + Sync {
    /// Announces a new entity. `snapshot` is the pre-image when the write
    /// overwrote an existing row.
    async fn created(&self, entity: &E, snapshot: Option<&E>) -> Result<()>;

    async fn updated(&self, entity: &E, snapshot: Option<&E>) -> Result<()>;

    async fn removed(&self, id: &EntityId) -> Result<()>;

    async fn restored(&self, id: &EntityId) -> Result<()>;

    async fn hard_removed(&self, id: &EntityId) -> Result<()>;
}

/// Publisher that encodes events as broker messages.
pub struct BrokerEventPublisher<E> {
    broker: Arc<dyn Broker>,
    breakers: Arc<CircuitBreakerRegistry>,
    service: String,
    provider: Provider,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> BrokerEventPublisher<E> {
    pub fn new(
        broker: Arc<dyn Broker>,
        breakers: Arc<CircuitBreakerRegistry>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            breakers,
            service: service.into(),
            provider: Provider::memory(),
            _entity: PhantomData,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    fn classify(lifecycle: Lifecycle) -> (EventKind, Priority) {
        match lifecycle {
            Lifecycle::Created => (EventKind::Integration, Priority::High),
            Lifecycle::HardRemoved => (EventKind::Domain, Priority::High),
            _ => (EventKind::Domain, Priority::Mid),
        }
    }

    #[tracing::instrument(skip(self, body, snapshot), fields(aggregate = E::aggregate_type(), action = lifecycle.as_str()))]
    async fn publish(
        &self,
        lifecycle: Lifecycle,
        id: &EntityId,
        body: Vec<u8>,
        snapshot: Option<&E>,
    ) -> Result<()> {
        let backup = match snapshot {
            Some(s) => serde_json::to_string(s)?,
            None => String::new(),
        };
        let transaction = Transaction::new(id.as_str(), E::event_name(lifecycle)).with_backup(backup);
        let (kind, priority) = Self::classify(lifecycle);
        let event = Event::new(&self.service, kind, priority, self.provider.clone(), body);
        let message = Message::encode(E::topic(lifecycle, id), event, &transaction);
        let topic = message.topic.clone();

        let breaker = self.breakers.get(E::aggregate_type(), lifecycle.as_str());
        breaker.call(|| self.broker.send(message)).await?;

        tracing::info!(%topic, transaction_id = %transaction.id, "event sent");
        Ok(())
    }

    fn id_body(id: &EntityId) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&[id.as_str()])?)
    }
}

#[async_trait]
impl<E: Entity> EventPublisher<E> for BrokerEventPublisher<E> {
    async fn created(&self, entity: &E, snapshot: Option<&E>) -> Result<()> {
        let body = entity.event_payload()?;
        self.publish(Lifecycle::Created, entity.id(), body, snapshot)
            .await
    }

    async fn updated(&self, entity: &E, snapshot: Option<&E>) -> Result<()> {
        let body = entity.event_payload()?;
        self.publish(Lifecycle::Updated, entity.id(), body, snapshot)
            .await
    }

    async fn removed(&self, id: &EntityId) -> Result<()> {
        self.publish(Lifecycle::Removed, id, Self::id_body(id)?, None)
            .await
    }

    async fn restored(&self, id: &EntityId) -> Result<()> {
        self.publish(Lifecycle::Restored, id, Self::id_body(id)?, None)
            .await
    }

    async fn hard_removed(&self, id: &EntityId) -> Result<()> {
        self.publish(Lifecycle::HardRemoved, id, Self::id_body(id)?, None)
            .await
    }
}

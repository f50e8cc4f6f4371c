//! Consumer loops feeding saga events to their handlers.

use std::future::Future;
use std::sync::Arc;

use common::{Entity, Service};
use domain::Blob;
use event_bus::{AckKind, Broker, Delivery, Subscription};
use saga::{ErrorKind, SagaCoordinator, SagaVerifier, verify_topic};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Subscribes to `<AGGREGATE>_VERIFY` and answers every delivery on its own
/// task.
pub struct VerifyConsumer<E: Entity> {
    verifier: Arc<SagaVerifier<E>>,
    broker: Arc<dyn Broker>,
}

impl<E: Entity> VerifyConsumer<E> {
    pub fn new(verifier: Arc<SagaVerifier<E>>, broker: Arc<dyn Broker>) -> Self {
        Self { verifier, broker }
    }

    /// Subscribes to the verify topic and consumes it until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> event_bus::Result<()> {
        let subscription = self.broker.subscribe(&verify_topic::<E>()).await?;
        self.consume(subscription, shutdown).await;
        Ok(())
    }

    /// Consumes `subscription` until `shutdown` fires or the broker goes
    /// away, then waits for in-flight deliveries to settle.
    pub async fn consume(self, subscription: Subscription, shutdown: CancellationToken) {
        let verifier = self.verifier;
        drain(subscription, shutdown, move |delivery| {
            let verifier = verifier.clone();
            async move {
                let result = verifier.verify(&delivery.message).await;
                settle(delivery, &result);
            }
        })
        .await;
    }
}

/// Subscribes to `<SERVICE>_BLOB_FAILED` for every service scope and rolls
/// the rejected uploads back.
pub struct RollbackConsumer {
    blobs: SagaCoordinator<Blob>,
    broker: Arc<dyn Broker>,
}

impl RollbackConsumer {
    pub fn new(blobs: SagaCoordinator<Blob>, broker: Arc<dyn Broker>) -> Self {
        Self { blobs, broker }
    }

    /// Subscribes to every failure topic and consumes them until `shutdown`
    /// fires.
    pub async fn run(self, shutdown: CancellationToken) -> event_bus::Result<()> {
        let mut subscriptions = Vec::with_capacity(Service::ALL.len());
        for service in Service::ALL {
            let topic = domain::blob::failed_topic(service);
            subscriptions.push(self.broker.subscribe(&topic).await?);
        }

        let mut loops = JoinSet::new();
        for subscription in subscriptions {
            let consumer = Self::new(self.blobs.clone(), self.broker.clone());
            loops.spawn(consumer.consume(subscription, shutdown.clone()));
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "rollback consumer panicked");
            }
        }
        Ok(())
    }

    /// Consumes one failure topic until `shutdown` fires or the broker goes
    /// away.
    pub async fn consume(self, subscription: Subscription, shutdown: CancellationToken) {
        let blobs = self.blobs;
        drain(subscription, shutdown, move |delivery| {
            let blobs = blobs.clone();
            async move {
                let result = blobs.on_failed(&delivery.message).await;
                settle(delivery, &result);
            }
        })
        .await;
    }
}

/// Runs `handle` on its own task for every delivery until `shutdown` fires
/// or the subscription ends, then waits for in-flight tasks.
async fn drain<H, Fut>(mut subscription: Subscription, shutdown: CancellationToken, handle: H)
where
    H: Fn(Delivery) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let topic = subscription.topic().to_string();
    tracing::info!(%topic, "consumer started");

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = subscription.next() => match delivery {
                Some(delivery) => {
                    tasks.spawn(handle(delivery));
                }
                None => break,
            },
        }
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(%topic, error = %e, "consumer task panicked");
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(%topic, error = %e, "consumer task panicked");
        }
    }
    tracing::info!(%topic, "consumer stopped");
}

/// Decides how a delivery is settled.
///
/// Errors that mean the work was not done because of a transient failure
/// are redelivered. Requests that can never succeed are dropped.
pub fn settlement<T>(result: &saga::Result<T>) -> AckKind {
    match result {
        Ok(_) => AckKind::Ack,
        Err(e) => match e.kind() {
            ErrorKind::Persistence | ErrorKind::Publish => AckKind::Nack,
            _ => AckKind::Ack,
        },
    }
}

fn settle<T>(delivery: Delivery, result: &saga::Result<T>) {
    match settlement(result) {
        AckKind::Ack => {
            if let Err(e) = result {
                tracing::warn!(error = %e, topic = %delivery.message.topic, attempt = delivery.attempt, "dropping unanswerable delivery");
            }
            delivery.ack();
        }
        AckKind::Nack => {
            if let Err(e) = result {
                tracing::warn!(error = %e, topic = %delivery.message.topic, attempt = delivery.attempt, "delivery failed, requesting redelivery");
            }
            delivery.nack();
        }
    }
}

#[cfg(test)]
mod tests {
    use common::ValidationError;
    use event_bus::EventBusError;
    use saga::{Rollback, SagaError, VerifyOutcome};
    use store::StoreError;

    use super::*;

    #[test]
    fn outcomes_are_acked() {
        assert_eq!(settlement(&Ok(VerifyOutcome::Verified)), AckKind::Ack);
        let failed = VerifyOutcome::Failed {
            code: 404,
            message: "category not found: x".into(),
        };
        assert_eq!(settlement(&Ok(failed)), AckKind::Ack);
    }

    #[test]
    fn transient_errors_are_nacked() {
        let unavailable = SagaError::Persistence(StoreError::Unavailable("down".into()));
        assert_eq!(settlement::<VerifyOutcome>(&Err(unavailable)), AckKind::Nack);

        let transport = SagaError::from(EventBusError::Transport("refused".into()));
        assert_eq!(settlement::<VerifyOutcome>(&Err(transport)), AckKind::Nack);
    }

    #[test]
    fn rollback_results_follow_the_same_policy() {
        assert_eq!(settlement(&Ok(Rollback::Erased)), AckKind::Ack);

        let gone: saga::Result<Rollback> = Err(SagaError::NotFound {
            aggregate_type: "blob",
            id: common::EntityId::new("0003clip"),
        });
        assert_eq!(settlement(&gone), AckKind::Ack);

        let outage: saga::Result<Rollback> =
            Err(SagaError::Persistence(StoreError::Unavailable("down".into())));
        assert_eq!(settlement(&outage), AckKind::Nack);
    }

    #[test]
    fn unanswerable_requests_are_acked() {
        let missing = SagaError::from(ValidationError::required("service"));
        assert_eq!(settlement::<VerifyOutcome>(&Err(missing)), AckKind::Ack);
    }
}

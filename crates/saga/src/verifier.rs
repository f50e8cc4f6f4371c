//! Consumer-side verification of foreign entity ids.

use std::sync::Arc;

use common::{Entity, EntityId, ValidationError};
use event_bus::{
    Broker, CircuitBreakerRegistry, Event, EventBusError, EventKind, Message, Priority, Provider,
    keys,
};
use store::{Repository, RepositoryExt, StoreError};

use crate::error::{Result, SagaError};

/// Status code of an outcome whose payload could not be parsed.
pub const BAD_REQUEST: u16 = 400;
/// Status code of an outcome naming a missing id.
pub const NOT_FOUND: u16 = 404;
/// Status code of a verified outcome.
pub const OK: u16 = 200;

/// The single answer to one verify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Failed { code: u16, message: String },
}

impl VerifyOutcome {
    pub fn code(&self) -> u16 {
        match self {
            VerifyOutcome::Verified => OK,
            VerifyOutcome::Failed { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            VerifyOutcome::Verified => "",
            VerifyOutcome::Failed { message, .. } => message,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            VerifyOutcome::Verified => "verified",
            VerifyOutcome::Failed { .. } => "failed",
        }
    }
}

/// Topic verify requests for `E` are consumed from, e.g. `CATEGORY_VERIFY`.
pub fn verify_topic<E: Entity>() -> String {
    format!("{}_VERIFY", E::aggregate_type().to_uppercase())
}

/// Answers "do these ids exist here" requests with exactly one outcome event.
pub struct SagaVerifier<E: Entity> {
    repository: Arc<dyn Repository<E>>,
    broker: Arc<dyn Broker>,
    breakers: Arc<CircuitBreakerRegistry>,
    service: String,
    provider: Provider,
}

impl<E: Entity> SagaVerifier<E> {
    pub fn new(
        repository: Arc<dyn Repository<E>>,
        broker: Arc<dyn Broker>,
        breakers: Arc<CircuitBreakerRegistry>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            broker,
            breakers,
            service: service.into(),
            provider: Provider::memory(),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Verifies the ids in `message` and publishes the outcome.
    ///
    /// Ids are checked in order and the first miss stops the scan. Errors
    /// mean no outcome was published: a `Validation` error can never be
    /// answered, `Persistence` and `Publish` errors are worth a redelivery.
    #[tracing::instrument(skip(self, message), fields(aggregate = E::aggregate_type(), topic = %message.topic))]
    pub async fn verify(&self, message: &Message) -> Result<VerifyOutcome> {
        let requester = message
            .service()
            .ok_or_else(|| ValidationError::required(keys::SERVICE))?
            .to_string();
        let transaction = message.transaction().map_err(|e| match e {
            EventBusError::MissingMetadata(key) => SagaError::from(ValidationError::required(key)),
            other => other.into(),
        })?;

        let outcome = self.check(&message.body).await?;

        let aggregate = E::aggregate_type().to_uppercase();
        let suffix = match outcome {
            VerifyOutcome::Verified => "VERIFIED",
            VerifyOutcome::Failed { .. } => "FAILED",
        };
        let operation = format!("{aggregate}_{suffix}");
        let topic = format!("{}_{operation}", requester.to_uppercase());

        let event = Event::new(
            &self.service,
            EventKind::Integration,
            Priority::High,
            self.provider.clone(),
            Vec::new(),
        );
        let reply = Message::encode(topic.clone(), event, &transaction.child(operation))
            .with_metadata(keys::STATUS_CODE, outcome.code().to_string())
            .with_metadata(keys::MESSAGE, outcome.message());

        let breaker = self
            .breakers
            .get(E::aggregate_type(), &suffix.to_lowercase());
        breaker.call(|| self.broker.send(reply)).await?;

        metrics::counter!("verifier_outcomes_total", "outcome" => outcome.label()).increment(1);
        tracing::info!(%topic, code = outcome.code(), "verification outcome sent");
        Ok(outcome)
    }

    async fn check(&self, body: &[u8]) -> Result<VerifyOutcome> {
        let ids: Vec<String> = match serde_json::from_slice(body) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::debug!(error = %e, "malformed verify payload");
                return Ok(VerifyOutcome::Failed {
                    code: BAD_REQUEST,
                    message: ValidationError::format("ids", "json array of strings").to_string(),
                });
            }
        };

        for id in ids {
            let id = EntityId::new(id);
            let found = self
                .repository
                .exists(&id)
                .await
                .map_err(SagaError::Persistence)?;
            if !found {
                let missing = StoreError::NotFound {
                    aggregate_type: E::aggregate_type(),
                    id,
                };
                return Ok(VerifyOutcome::Failed {
                    code: NOT_FOUND,
                    message: missing.to_string(),
                });
            }
        }
        Ok(VerifyOutcome::Verified)
    }
}

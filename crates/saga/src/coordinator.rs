//! Saga coordinator for entity lifecycle operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Entity, EntityId, ValidationError};
use event_bus::EventPublisher;
use store::{ObjectStore, Repository, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::command::{Command, SagaStep};
use crate::dispatch::{PublishFailure, dispatch};
use crate::error::{Result, SagaError};
use crate::state::{Operation, SagaReport, SagaState};

/// Tuning for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Deadline for a single publish.
    pub publish_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// The result of one coordinated operation and the states it walked through.
#[derive(Debug)]
pub struct SagaOutcome<T> {
    pub result: Result<T>,
    pub report: SagaReport,
}

impl<T> SagaOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Lifecycle event announced after a primary write.
#[derive(Debug, Clone)]
pub(crate) enum Publication<E> {
    Created { entity: E, snapshot: Option<E> },
    Updated { entity: E, snapshot: E },
    Removed(EntityId),
    Restored(EntityId),
    HardRemoved(EntityId),
}

impl<E: Entity> Publication<E> {
    async fn send(self, publisher: Arc<dyn EventPublisher<E>>) -> event_bus::Result<()> {
        match self {
            Publication::Created { entity, snapshot } => {
                publisher.created(&entity, snapshot.as_ref()).await
            }
            Publication::Updated { entity, snapshot } => {
                publisher.updated(&entity, Some(&snapshot)).await
            }
            Publication::Removed(id) => publisher.removed(&id).await,
            Publication::Restored(id) => publisher.restored(&id).await,
            Publication::HardRemoved(id) => publisher.hard_removed(&id).await,
        }
    }
}

/// Orchestrates each mutating operation as
/// `[object write] → repository write → event publish`, undoing the writes
/// when the publish fails.
///
/// Persistence failures before the publish are returned as they are; a failed
/// publish always compensates, once. A compensation failure is logged and
/// returned as [`SagaError::Compensation`].
pub struct SagaCoordinator<E: Entity> {
    repository: Arc<dyn Repository<E>>,
    publisher: Arc<dyn EventPublisher<E>>,
    objects: Option<Arc<dyn ObjectStore>>,
    config: SagaConfig,
}

impl<E: Entity> Clone for SagaCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            publisher: self.publisher.clone(),
            objects: self.objects.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Entity> SagaCoordinator<E> {
    /// Creates a new saga coordinator.
    pub fn new(repository: Arc<dyn Repository<E>>, publisher: Arc<dyn EventPublisher<E>>) -> Self {
        Self {
            repository,
            publisher,
            objects: None,
            config: SagaConfig::default(),
        }
    }

    /// Wires an object store for entities with binary payloads.
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub(crate) fn repository(&self) -> &dyn Repository<E> {
        self.repository.as_ref()
    }

    pub(crate) fn objects(&self) -> Option<&dyn ObjectStore> {
        self.objects.as_deref()
    }

    /// Fetches a live entity. Not a saga step.
    #[tracing::instrument(skip(self), fields(aggregate = E::aggregate_type()))]
    pub async fn get(&self, id: &EntityId) -> Result<E> {
        Ok(self.repository.fetch_by_id(id).await?)
    }

    /// Validates and stores a new entity, then announces it.
    #[tracing::instrument(skip(self, entity, cancel), fields(aggregate = E::aggregate_type(), id = %entity.id()))]
    pub async fn create(&self, entity: E, cancel: &CancellationToken) -> SagaOutcome<E> {
        let mut report = SagaReport::new(Operation::Create);
        let started = self.begin(Operation::Create);
        let result = self.create_entity(entity, &mut report, cancel).await;
        self.finish(Operation::Create, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    /// Applies field deltas to the current entity, then announces the update.
    ///
    /// The fetched row is the snapshot restored when the publish fails.
    #[tracing::instrument(skip(self, apply, cancel), fields(aggregate = E::aggregate_type()))]
    pub async fn update<F>(
        &self,
        id: &EntityId,
        apply: F,
        cancel: &CancellationToken,
    ) -> SagaOutcome<E>
    where
        F: FnOnce(&E) -> std::result::Result<E, ValidationError> + Send,
    {
        let mut report = SagaReport::new(Operation::Update);
        let started = self.begin(Operation::Update);
        let result = self.update_entity(id, apply, &mut report, cancel).await;
        self.finish(Operation::Update, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    /// Soft-deletes an entity, then announces the removal.
    #[tracing::instrument(skip(self, cancel), fields(aggregate = E::aggregate_type()))]
    pub async fn delete(&self, id: &EntityId, cancel: &CancellationToken) -> SagaOutcome<()> {
        let step = SagaStep::delete(id.clone());
        let publication = Publication::Removed(id.clone());
        self.run_by_id(Operation::Delete, id, step, publication, cancel)
            .await
    }

    /// Reactivates a soft-deleted entity, then announces it.
    #[tracing::instrument(skip(self, cancel), fields(aggregate = E::aggregate_type()))]
    pub async fn restore(&self, id: &EntityId, cancel: &CancellationToken) -> SagaOutcome<()> {
        let step = SagaStep::restore(id.clone());
        let publication = Publication::Restored(id.clone());
        self.run_by_id(Operation::Restore, id, step, publication, cancel)
            .await
    }

    /// Erases an entity, then announces it.
    ///
    /// The row is snapshotted first (in any state) since the erase cannot be
    /// undone at the store level.
    #[tracing::instrument(skip(self, cancel), fields(aggregate = E::aggregate_type()))]
    pub async fn hard_delete(&self, id: &EntityId, cancel: &CancellationToken) -> SagaOutcome<()> {
        let mut report = SagaReport::new(Operation::HardDelete);
        let started = self.begin(Operation::HardDelete);
        let result = self.hard_delete_entity(id, &mut report, cancel).await;
        self.finish(Operation::HardDelete, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    async fn create_entity(
        &self,
        entity: E,
        report: &mut SagaReport,
        cancel: &CancellationToken,
    ) -> Result<E> {
        entity.validate()?;
        report.enter(SagaState::Validated);

        let step = SagaStep::create(entity.clone());
        let publication = Publication::Created {
            entity: entity.clone(),
            snapshot: None,
        };
        self.run(report, Operation::Create, step, publication, cancel)
            .await?;
        Ok(entity)
    }

    async fn update_entity<F>(
        &self,
        id: &EntityId,
        apply: F,
        report: &mut SagaReport,
        cancel: &CancellationToken,
    ) -> Result<E>
    where
        F: FnOnce(&E) -> std::result::Result<E, ValidationError> + Send,
    {
        require_id(id)?;
        let snapshot = self
            .cancellable(cancel, self.repository.fetch_by_id(id))
            .await?;
        let next = apply(&snapshot)?;
        next.validate()?;
        report.enter(SagaState::Validated);

        let step = SagaStep::update(next.clone(), snapshot.clone());
        let publication = Publication::Updated {
            entity: next.clone(),
            snapshot,
        };
        self.run(report, Operation::Update, step, publication, cancel)
            .await?;
        Ok(next)
    }

    async fn hard_delete_entity(
        &self,
        id: &EntityId,
        report: &mut SagaReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        require_id(id)?;
        let snapshot = self
            .cancellable(cancel, self.repository.fetch_snapshot(id))
            .await?;
        report.enter(SagaState::Validated);

        let step = SagaStep::hard_delete(snapshot);
        let publication = Publication::HardRemoved(id.clone());
        self.run(report, Operation::HardDelete, step, publication, cancel)
            .await
    }

    async fn run_by_id(
        &self,
        operation: Operation,
        id: &EntityId,
        step: SagaStep<E>,
        publication: Publication<E>,
        cancel: &CancellationToken,
    ) -> SagaOutcome<()> {
        let mut report = SagaReport::new(operation);
        let started = self.begin(operation);

        let result = match require_id(id) {
            Ok(()) => {
                report.enter(SagaState::Validated);
                self.run(&mut report, operation, step, publication, cancel)
                    .await
            }
            Err(e) => Err(e),
        };

        self.finish(operation, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    /// Runs the primary write of `step` and publishes `publication`,
    /// compensating with the inverse commands if the publish fails.
    pub(crate) async fn run(
        &self,
        report: &mut SagaReport,
        operation: Operation,
        step: SagaStep<E>,
        publication: Publication<E>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write(cancel, &step).await?;
        report.enter(SagaState::PrimaryCommitted);

        report.enter(SagaState::PublishPending);
        match self.publish(publication, cancel).await {
            Ok(()) => Ok(()),
            Err(failure) => {
                let failure = SagaError::Publish(failure);
                report.enter(SagaState::Compensating);
                self.compensate(operation, &step, failure).await
            }
        }
    }

    /// Executes the forward commands of a step, aborting if `cancel` fires.
    pub(crate) async fn write(&self, cancel: &CancellationToken, step: &SagaStep<E>) -> Result<()> {
        let objects = self.objects();
        for command in &step.forward {
            self.cancellable(cancel, command.execute(self.repository(), objects))
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn publish(
        &self,
        publication: Publication<E>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), PublishFailure> {
        let publisher = self.publisher.clone();
        dispatch(
            publication.send(publisher),
            self.config.publish_timeout,
            cancel.child_token(),
        )
        .await
    }

    /// Attempts every inverse command once, outside any cancellation scope.
    ///
    /// Returns `cause` when the undo succeeded, or a compensation error
    /// wrapping it otherwise.
    pub(crate) async fn compensate(
        &self,
        operation: Operation,
        step: &SagaStep<E>,
        cause: SagaError,
    ) -> Result<()> {
        tracing::warn!(%operation, error = %cause, "publish failed, compensating");
        metrics::counter!("saga_compensations_total", "operation" => operation.as_str())
            .increment(1);

        match self.undo(operation, step.inverse.clone()).await {
            None => Err(cause),
            Some(compensation_error) => {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                Err(SagaError::Compensation {
                    operation: operation.to_string(),
                    source_error: Box::new(cause),
                    compensation_error,
                })
            }
        }
    }

    /// Runs `commands` in order on a task of their own and waits for it.
    ///
    /// The task owns the stores, so it finishes even when the caller's future
    /// is dropped. Every command is attempted; the first failure is returned.
    pub(crate) async fn undo(
        &self,
        operation: Operation,
        commands: Vec<Command<E>>,
    ) -> Option<StoreError> {
        let repository = self.repository.clone();
        let objects = self.objects.clone();
        let task = tokio::spawn(
            async move {
                let mut first_failure = None;
                for command in &commands {
                    if let Err(e) = command.execute(repository.as_ref(), objects.as_deref()).await {
                        tracing::error!(
                            %operation,
                            command = command.name(),
                            error = %e,
                            "compensation failed"
                        );
                        first_failure.get_or_insert(e);
                    }
                }
                first_failure
            }
            .in_current_span(),
        );

        match task.await {
            Ok(first_failure) => first_failure,
            Err(join_err) => Some(StoreError::Unavailable(format!(
                "compensation task failed: {join_err}"
            ))),
        }
    }

    /// Awaits a store call unless the caller cancels first.
    pub(crate) async fn cancellable<T, F>(&self, cancel: &CancellationToken, call: F) -> Result<T>
    where
        F: std::future::Future<Output = store::Result<T>>,
    {
        let scope = cancel.child_token();
        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(SagaError::Cancelled),
            result = call => Ok(result?),
        }
    }

    pub(crate) fn begin(&self, operation: Operation) -> Instant {
        metrics::counter!("saga_operations_total", "operation" => operation.as_str())
            .increment(1);
        Instant::now()
    }

    pub(crate) fn finish<T>(
        &self,
        operation: Operation,
        started: Instant,
        report: &mut SagaReport,
        result: &Result<T>,
    ) {
        metrics::histogram!("saga_duration_seconds", "operation" => operation.as_str())
            .record(started.elapsed().as_secs_f64());
        match result {
            Ok(_) => {
                report.enter(SagaState::Committed);
                tracing::info!(%operation, "saga committed");
            }
            Err(e) => {
                report.enter(SagaState::Failed);
                tracing::info!(%operation, error = %e, kind = ?e.kind(), "saga failed");
            }
        }
    }
}

fn require_id(id: &EntityId) -> Result<()> {
    if id.is_blank() {
        return Err(ValidationError::required("id").into());
    }
    Ok(())
}

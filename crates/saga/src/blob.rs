//! Blob sagas: the payload write joins the repository write.

use common::{Entity, EntityId, Service, ValidationError};
use domain::Blob;
use event_bus::{EventBusError, Message, keys};
use tokio_util::sync::CancellationToken;

use crate::command::{Command, SagaStep};
use crate::coordinator::{Publication, SagaCoordinator, SagaOutcome};
use crate::error::{Result, SagaError};
use crate::state::{Operation, SagaReport, SagaState};

impl SagaCoordinator<Blob> {
    /// Stores a blob payload and its descriptor, then announces the upload.
    ///
    /// Upsert: an existing row with the same id becomes the snapshot and the
    /// operation is an update. The payload is written first. When the publish
    /// fails a create erases both payload and row, an update writes the
    /// snapshot back.
    #[tracing::instrument(skip(self, blob, content, cancel), fields(id = %blob.id, size = content.len()))]
    pub async fn upload(
        &self,
        blob: Blob,
        content: Vec<u8>,
        cancel: &CancellationToken,
    ) -> SagaOutcome<Blob> {
        let mut report = SagaReport::new(Operation::Upload);
        let started = self.begin(Operation::Upload);
        let result = self.upload_blob(blob, content, &mut report, cancel).await;
        self.finish(Operation::Upload, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    /// Deletes a blob payload and erases its descriptor, then announces it.
    ///
    /// The payload cannot be brought back, so a failed publish is returned
    /// without compensation.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn erase(
        &self,
        service: &str,
        root_id: &str,
        cancel: &CancellationToken,
    ) -> SagaOutcome<()> {
        let mut report = SagaReport::new(Operation::Erase);
        let started = self.begin(Operation::Erase);
        let result = self.erase_blob(service, root_id, &mut report, cancel).await;
        self.finish(Operation::Erase, started, &mut report, &result);
        SagaOutcome { result, report }
    }

    /// Undoes an upload that a downstream service reported as failed.
    ///
    /// `backup` is the backup metadata of the upload event, echoed back by the
    /// reporter. An empty or non-JSON backup means the upload created the
    /// blob, so payload and row are erased. A JSON backup must be the row the
    /// upload overwrote and is saved back. The undo runs outside any
    /// cancellation scope.
    #[tracing::instrument(skip(self, backup))]
    pub async fn rollback_failed(
        &self,
        service: &str,
        root_id: &str,
        backup: &str,
    ) -> Result<Rollback> {
        // the echoed root id may still carry the service prefix
        let root = EntityId::new(root_id.trim());
        let id = blob_id(service, root.root_for(service))?;
        let current = self.repository().fetch_snapshot(&id).await?;

        let (rollback, commands) = if serde_json::from_str::<serde_json::Value>(backup).is_err() {
            (
                Rollback::Erased,
                vec![
                    Command::DeleteObject {
                        key: current.name.clone(),
                        scope: current.service.clone(),
                    },
                    Command::HardRemove(id),
                ],
            )
        } else {
            let previous = serde_json::from_str::<Blob>(backup)
                .ok()
                .filter(|previous| previous.id == id)
                .ok_or_else(|| ValidationError::format("backup", "snapshot of the same blob"))?;
            (Rollback::Restored, vec![Command::Save(previous)])
        };

        tracing::warn!(rollback = rollback.as_str(), "rolling back rejected upload");
        if let Some(e) = self.undo(Operation::Rollback, commands).await {
            metrics::counter!("saga_compensation_failures_total").increment(1);
            return Err(e.into());
        }
        metrics::counter!("saga_rollbacks_total", "rollback" => rollback.as_str()).increment(1);
        Ok(rollback)
    }

    /// Decodes a `<SERVICE>_BLOB_FAILED` message and rolls its upload back.
    ///
    /// The reporting service and the echoed transaction name the blob.
    pub async fn on_failed(&self, message: &Message) -> Result<Rollback> {
        let service = message
            .service()
            .ok_or_else(|| ValidationError::required(keys::SERVICE))?
            .to_string();
        let transaction = message.transaction().map_err(|e| match e {
            EventBusError::MissingMetadata(key) => SagaError::from(ValidationError::required(key)),
            other => other.into(),
        })?;
        if transaction.root_id.is_empty() {
            return Err(ValidationError::required(keys::ROOT_ID).into());
        }
        self.rollback_failed(&service, &transaction.root_id, &transaction.backup)
            .await
    }

    /// Fetches a blob descriptor by service and client-facing id.
    pub async fn get_blob(&self, service: &str, root_id: &str) -> Result<Blob> {
        let id = blob_id(service, root_id)?;
        self.get(&id).await
    }

    async fn upload_blob(
        &self,
        mut blob: Blob,
        content: Vec<u8>,
        report: &mut SagaReport,
        cancel: &CancellationToken,
    ) -> Result<Blob> {
        blob.validate()?;
        report.enter(SagaState::Validated);

        let snapshot = match self
            .cancellable(cancel, self.repository().fetch_snapshot(blob.id()))
            .await
        {
            Ok(existing) => Some(existing),
            Err(SagaError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        if let Some(existing) = &snapshot {
            blob.created_at = existing.created_at;
        }

        let object = Command::StoreObject {
            key: blob.name.clone(),
            scope: blob.service.clone(),
            content,
        };
        let cleanup = Command::DeleteObject {
            key: blob.name.clone(),
            scope: blob.service.clone(),
        };

        let step = match &snapshot {
            None => SagaStep::new(object, cleanup.clone())
                .with_forward(Command::Save(blob.clone()))
                .with_inverse(Command::HardRemove(blob.id.clone())),
            Some(previous) => SagaStep::new(object, Command::Save(previous.clone()))
                .with_forward(Command::Save(blob.clone())),
        };

        if let Err(e) = self.write(cancel, &step).await {
            // the payload may be written (or half written) while the row is
            // not; deletes are idempotent so the cleanup runs on any failure
            if snapshot.is_none() && self.undo(Operation::Upload, vec![cleanup]).await.is_some() {
                tracing::error!(name = %blob.name, "orphaned blob payload left behind");
            }
            return Err(e);
        }
        report.enter(SagaState::PrimaryCommitted);

        report.enter(SagaState::PublishPending);
        let publication = Publication::Created {
            entity: blob.clone(),
            snapshot,
        };
        if let Err(failure) = self.publish(publication, cancel).await {
            report.enter(SagaState::Compensating);
            self.compensate(Operation::Upload, &step, SagaError::Publish(failure))
                .await?;
        }
        Ok(blob)
    }

    async fn erase_blob(
        &self,
        service: &str,
        root_id: &str,
        report: &mut SagaReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = blob_id(service, root_id)?;
        let blob = self
            .cancellable(cancel, self.repository().fetch_by_id(&id))
            .await?;
        report.enter(SagaState::Validated);

        let step = SagaStep::irreversible(vec![
            Command::DeleteObject {
                key: blob.name.clone(),
                scope: blob.service.clone(),
            },
            Command::HardRemove(id.clone()),
        ]);
        self.write(cancel, &step).await?;
        report.enter(SagaState::PrimaryCommitted);

        report.enter(SagaState::PublishPending);
        if let Err(failure) = self.publish(Publication::Removed(id), cancel).await {
            tracing::warn!(error = %failure, "blob removal event lost, nothing to compensate");
            return Err(failure.into());
        }
        Ok(())
    }
}

/// How a rejected upload was undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// The upload created the blob; payload and row are gone.
    Erased,
    /// The upload overwrote a blob; the previous row is back.
    Restored,
}

impl Rollback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rollback::Erased => "erased",
            Rollback::Restored => "restored",
        }
    }
}

/// Builds the storage id of a blob from its client-facing parts.
pub fn blob_id(service: &str, root_id: &str) -> Result<EntityId> {
    if root_id.trim().is_empty() {
        return Err(ValidationError::required("id").into());
    }
    if Service::from_name(service).is_none() {
        return Err(ValidationError::format("service", "[media author user]").into());
    }
    Ok(EntityId::prefixed(service, root_id.trim()))
}

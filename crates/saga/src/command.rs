//! Store commands and their inverses.
//!
//! Every mutating step is expressed as a forward command plus the commands
//! that undo it, so update, delete, restore and hard delete compensate the
//! same way.

use common::{Entity, EntityId};
use store::{ObjectStore, Repository};

/// A single store mutation.
#[derive(Debug, Clone)]
pub enum Command<E> {
    Save(E),
    Replace(E),
    Remove(EntityId),
    Restore(EntityId),
    HardRemove(EntityId),
    StoreObject {
        key: String,
        scope: String,
        content: Vec<u8>,
    },
    DeleteObject {
        key: String,
        scope: String,
    },
}

impl<E: Entity> Command<E> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Save(_) => "save",
            Command::Replace(_) => "replace",
            Command::Remove(_) => "remove",
            Command::Restore(_) => "restore",
            Command::HardRemove(_) => "hard_remove",
            Command::StoreObject { .. } => "store_object",
            Command::DeleteObject { .. } => "delete_object",
        }
    }

    /// Runs the command against the stores.
    ///
    /// Object commands fail with `Unavailable` when no object store is wired.
    pub async fn execute(
        &self,
        repository: &dyn Repository<E>,
        objects: Option<&dyn ObjectStore>,
    ) -> store::Result<()> {
        match self {
            Command::Save(entity) => repository.save(entity).await,
            Command::Replace(entity) => repository.replace(entity).await,
            Command::Remove(id) => repository.remove(id).await,
            Command::Restore(id) => repository.restore(id).await,
            Command::HardRemove(id) => repository.hard_remove(id).await,
            Command::StoreObject {
                key,
                scope,
                content,
            } => require(objects)?.store(key, scope, content).await,
            Command::DeleteObject { key, scope } => require(objects)?.delete(key, scope).await,
        }
    }
}

fn require(objects: Option<&dyn ObjectStore>) -> store::Result<&dyn ObjectStore> {
    objects.ok_or_else(|| store::StoreError::Unavailable("no object store configured".to_string()))
}

/// Forward commands of one saga step and the commands that undo them.
#[derive(Debug, Clone)]
pub struct SagaStep<E> {
    pub forward: Vec<Command<E>>,
    pub inverse: Vec<Command<E>>,
}

impl<E: Entity> SagaStep<E> {
    pub fn new(forward: Command<E>, inverse: Command<E>) -> Self {
        Self {
            forward: vec![forward],
            inverse: vec![inverse],
        }
    }

    /// Create: save the row, undo by erasing it.
    pub fn create(entity: E) -> Self {
        let id = entity.id().clone();
        Self::new(Command::Save(entity), Command::HardRemove(id))
    }

    /// Update: replace the row, undo by writing the snapshot back.
    pub fn update(next: E, snapshot: E) -> Self {
        Self::new(Command::Replace(next), Command::Replace(snapshot))
    }

    /// Soft delete, undone by a restore.
    pub fn delete(id: EntityId) -> Self {
        Self::new(Command::Remove(id.clone()), Command::Restore(id))
    }

    /// Restore, undone by a soft delete.
    pub fn restore(id: EntityId) -> Self {
        Self::new(Command::Restore(id.clone()), Command::Remove(id))
    }

    /// Hard delete, undone by saving the snapshot captured beforehand.
    pub fn hard_delete(snapshot: E) -> Self {
        let id = snapshot.id().clone();
        Self::new(Command::HardRemove(id), Command::Save(snapshot))
    }

    pub fn with_forward(mut self, command: Command<E>) -> Self {
        self.forward.push(command);
        self
    }

    pub fn with_inverse(mut self, command: Command<E>) -> Self {
        self.inverse.push(command);
        self
    }

    pub fn irreversible(forward: Vec<Command<E>>) -> Self {
        Self {
            forward,
            inverse: Vec::new(),
        }
    }
}

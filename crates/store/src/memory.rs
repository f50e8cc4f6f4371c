use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    Entity, EntityId, Result, StoreError, object::ObjectStore, repository::Repository,
};

/// Repository operations, used to inject failures and inspect call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    Save,
    FetchById,
    FetchSnapshot,
    Replace,
    Remove,
    Restore,
    HardRemove,
}

/// A recorded repository call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCall {
    pub op: RepoOp,
    pub id: EntityId,
}

struct RepoState<E> {
    rows: HashMap<EntityId, E>,
    fail_on: HashSet<RepoOp>,
    delays: HashMap<RepoOp, Duration>,
    calls: Vec<RepoCall>,
}

impl<E> Default for RepoState<E> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            fail_on: HashSet::new(),
            delays: HashMap::new(),
            calls: Vec::new(),
        }
    }
}

/// In-memory repository for tests and local runs.
///
/// Every operation is atomic under a single lock. Failures can be injected
/// per operation, and every call is journaled so tests can assert on the
/// exact sequence the saga issued.
#[derive(Clone)]
pub struct InMemoryRepository<E> {
    state: Arc<RwLock<RepoState<E>>>,
}

impl<E> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(RepoState::default())),
        }
    }
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given operation fail with `Unavailable` until cleared.
    pub fn set_fail_on(&self, op: RepoOp, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_on.insert(op);
        } else {
            state.fail_on.remove(&op);
        }
    }

    /// Makes the given operation sleep before it touches any row.
    pub fn set_delay_on(&self, op: RepoOp, delay: Option<Duration>) {
        let mut state = self.state.write().unwrap();
        match delay {
            Some(delay) => state.delays.insert(op, delay),
            None => state.delays.remove(&op),
        };
    }

    /// Returns every call issued so far, in order.
    pub fn calls(&self) -> Vec<RepoCall> {
        self.state.read().unwrap().calls.clone()
    }

    /// Returns the number of calls for the given operation.
    pub fn call_count(&self, op: RepoOp) -> usize {
        self.state
            .read()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Returns the stored row (active or not) without journaling.
    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.state.read().unwrap().rows.get(id).cloned()
    }

    /// Inserts a row directly, bypassing validation and failure injection.
    pub fn insert(&self, entity: E) {
        self.state
            .write()
            .unwrap()
            .rows
            .insert(entity.id().clone(), entity);
    }

    /// Returns the number of stored rows.
    pub fn len(&self) -> usize {
        self.state.read().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn pause(&self, op: RepoOp) {
        let delay = self.state.read().unwrap().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn begin(state: &mut RepoState<E>, op: RepoOp, id: &EntityId) -> Result<()> {
        state.calls.push(RepoCall {
            op,
            id: id.clone(),
        });
        if state.fail_on.contains(&op) {
            return Err(StoreError::Unavailable(format!(
                "injected {op:?} failure for {}",
                E::aggregate_type()
            )));
        }
        Ok(())
    }

    fn not_found(id: &EntityId) -> StoreError {
        StoreError::NotFound {
            aggregate_type: E::aggregate_type(),
            id: id.clone(),
        }
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn save(&self, entity: &E) -> Result<()> {
        self.pause(RepoOp::Save).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::Save, entity.id())?;

        if let Some(key) = entity.unique_key() {
            let taken = state
                .rows
                .values()
                .any(|row| row.id() != entity.id() && row.unique_key().as_deref() == Some(key.as_str()));
            if taken {
                return Err(StoreError::Conflict {
                    aggregate_type: E::aggregate_type(),
                    key,
                });
            }
        }

        state.rows.insert(entity.id().clone(), entity.clone());
        Ok(())
    }

    async fn fetch_by_id(&self, id: &EntityId) -> Result<E> {
        self.pause(RepoOp::FetchById).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::FetchById, id)?;
        state
            .rows
            .get(id)
            .filter(|row| row.is_active())
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn fetch_snapshot(&self, id: &EntityId) -> Result<E> {
        self.pause(RepoOp::FetchSnapshot).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::FetchSnapshot, id)?;
        state
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn replace(&self, entity: &E) -> Result<()> {
        self.pause(RepoOp::Replace).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::Replace, entity.id())?;
        if !state.rows.contains_key(entity.id()) {
            return Err(Self::not_found(entity.id()));
        }
        if let Some(key) = entity.unique_key() {
            let taken = state
                .rows
                .values()
                .any(|row| row.id() != entity.id() && row.unique_key().as_deref() == Some(key.as_str()));
            if taken {
                return Err(StoreError::Conflict {
                    aggregate_type: E::aggregate_type(),
                    key,
                });
            }
        }
        state.rows.insert(entity.id().clone(), entity.clone());
        Ok(())
    }

    async fn remove(&self, id: &EntityId) -> Result<()> {
        self.pause(RepoOp::Remove).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::Remove, id)?;
        match state.rows.get_mut(id) {
            Some(row) if row.is_active() => {
                row.set_active(false);
                row.touch();
                Ok(())
            }
            _ => Err(Self::not_found(id)),
        }
    }

    async fn restore(&self, id: &EntityId) -> Result<()> {
        self.pause(RepoOp::Restore).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::Restore, id)?;
        match state.rows.get_mut(id) {
            Some(row) if !row.is_active() => {
                row.set_active(true);
                row.touch();
                Ok(())
            }
            _ => Err(Self::not_found(id)),
        }
    }

    async fn hard_remove(&self, id: &EntityId) -> Result<()> {
        self.pause(RepoOp::HardRemove).await;
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, RepoOp::HardRemove, id)?;
        state
            .rows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }
}

/// Object store operations, used to inject failures and inspect call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectOp {
    Store,
    Delete,
    Fetch,
}

/// A recorded object store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCall {
    pub op: ObjectOp,
    pub key: String,
    pub scope: String,
}

#[derive(Default)]
struct ObjectState {
    objects: HashMap<(String, String), Vec<u8>>,
    fail_on: HashSet<ObjectOp>,
    calls: Vec<ObjectCall>,
}

/// In-memory object store for tests.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<ObjectState>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given operation fail with `Unavailable` until cleared.
    pub fn set_fail_on(&self, op: ObjectOp, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_on.insert(op);
        } else {
            state.fail_on.remove(&op);
        }
    }

    pub fn calls(&self) -> Vec<ObjectCall> {
        self.state.read().unwrap().calls.clone()
    }

    /// Returns true if a payload exists under `scope/key`.
    pub fn contains(&self, key: &str, scope: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .objects
            .contains_key(&(scope.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin(state: &mut ObjectState, op: ObjectOp, key: &str, scope: &str) -> Result<()> {
        state.calls.push(ObjectCall {
            op,
            key: key.to_string(),
            scope: scope.to_string(),
        });
        if state.fail_on.contains(&op) {
            return Err(StoreError::Unavailable(format!(
                "injected {op:?} failure for {scope}/{key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(&self, key: &str, scope: &str, content: &[u8]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, ObjectOp::Store, key, scope)?;
        state
            .objects
            .insert((scope.to_string(), key.to_string()), content.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str, scope: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, ObjectOp::Delete, key, scope)?;
        state
            .objects
            .remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }

    async fn fetch(&self, key: &str, scope: &str) -> Result<Vec<u8>> {
        let mut state = self.state.write().unwrap();
        Self::begin(&mut state, ObjectOp::Fetch, key, scope)?;
        state
            .objects
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                key: key.to_string(),
                scope: scope.to_string(),
            })
    }
}

//! Contract every persisted entity fulfils.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{EntityId, ValidationError};

/// Lifecycle step an entity event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Created,
    Updated,
    Removed,
    Restored,
    HardRemoved,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 5] = [
        Lifecycle::Created,
        Lifecycle::Updated,
        Lifecycle::Removed,
        Lifecycle::Restored,
        Lifecycle::HardRemoved,
    ];

    /// Lowercase action name, used for breaker keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Updated => "updated",
            Lifecycle::Removed => "removed",
            Lifecycle::Restored => "restored",
            Lifecycle::HardRemoved => "hard_removed",
        }
    }

    /// Suffix of the default event name (`<AGGREGATE>_<SUFFIX>`).
    pub fn event_suffix(&self) -> &'static str {
        match self {
            Lifecycle::Created => "CREATED",
            Lifecycle::Updated => "UPDATED",
            Lifecycle::Removed => "REMOVED",
            Lifecycle::Restored => "RESTORED",
            Lifecycle::HardRemoved => "PERMANENTLY_REMOVED",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record that the repositories can persist and the saga layer can
/// snapshot, soft-delete and restore.
///
/// Implementations must be cheap to clone: the coordinator keeps a full
/// pre-image of the row as its compensation snapshot.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Aggregate name used for topics, tables and breaker keys (e.g. `"category"`).
    fn aggregate_type() -> &'static str;

    /// Returns the storage id of this entity.
    fn id(&self) -> &EntityId;

    /// Optional value that must be unique among entities of this type.
    ///
    /// Repositories reject a second entity with the same key with a conflict.
    fn unique_key(&self) -> Option<String> {
        None
    }

    /// Returns false once the entity has been soft-deleted.
    fn is_active(&self) -> bool;

    /// Sets the soft-delete marker.
    fn set_active(&mut self, active: bool);

    /// Last modification time.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Refreshes the modification time.
    fn touch(&mut self);

    /// Checks the entity against its validation rules. Must be side-effect free.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Event name announcing `lifecycle` for this entity type.
    fn event_name(lifecycle: Lifecycle) -> String {
        format!(
            "{}_{}",
            Self::aggregate_type().to_uppercase(),
            lifecycle.event_suffix()
        )
    }

    /// Topic the event for entity `id` is published on.
    fn topic(lifecycle: Lifecycle, _id: &EntityId) -> String {
        Self::event_name(lifecycle)
    }

    /// Body of the created/updated event.
    fn event_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_event_names() {
        assert_eq!(Lifecycle::HardRemoved.event_suffix(), "PERMANENTLY_REMOVED");
        assert_eq!(Lifecycle::Restored.as_str(), "restored");
    }
}

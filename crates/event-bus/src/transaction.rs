use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates one saga step across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub root_id: String,
    pub span_id: String,
    pub trace_id: String,
    /// Event name of the step, e.g. `CATEGORY_CREATED`.
    pub operation: String,
    /// Serialized pre-image of the entity; empty for creates.
    pub backup: String,
}

impl Transaction {
    /// Starts a new transaction with fresh span and trace ids.
    pub fn new(root_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            root_id: root_id.into(),
            span_id: new_span_id(),
            trace_id: Uuid::new_v4().simple().to_string(),
            operation: operation.into(),
            backup: String::new(),
        }
    }

    pub fn with_backup(mut self, backup: impl Into<String>) -> Self {
        self.backup = backup.into();
        self
    }

    /// Continues this transaction in a new span, keeping its id and trace.
    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            root_id: self.root_id.clone(),
            span_id: new_span_id(),
            trace_id: self.trace_id.clone(),
            operation: operation.into(),
            backup: self.backup.clone(),
        }
    }

    pub fn has_backup(&self) -> bool {
        !self.backup.is_empty()
    }
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

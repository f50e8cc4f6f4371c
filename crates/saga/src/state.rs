//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of one coordinated operation.
///
/// State transitions:
/// ```text
/// Validated ──► PrimaryCommitted ──► PublishPending ──┬──► Committed
///                                                     └──► Compensating ──► Failed
/// ```
/// An operation that fails before its primary write commits goes straight
/// to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaState {
    /// Input passed validation; nothing has been written.
    Validated,

    /// The repository (and object store) write succeeded.
    PrimaryCommitted,

    /// The lifecycle event is being published.
    PublishPending,

    /// Write and event both succeeded (terminal state).
    Committed,

    /// Publishing failed and the primary write is being undone.
    Compensating,

    /// The operation returned an error (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (Validated, PrimaryCommitted)
                | (Validated, Failed)
                | (PrimaryCommitted, PublishPending)
                | (PublishPending, Committed)
                | (PublishPending, Compensating)
                | (PublishPending, Failed)
                | (Compensating, Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Validated => "Validated",
            SagaState::PrimaryCommitted => "PrimaryCommitted",
            SagaState::PublishPending => "PublishPending",
            SagaState::Committed => "Committed",
            SagaState::Compensating => "Compensating",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coordinated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Restore,
    HardDelete,
    Upload,
    Erase,
    /// Undo of an upload a downstream service rejected.
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Restore => "restore",
            Operation::HardDelete => "hard_delete",
            Operation::Upload => "upload",
            Operation::Erase => "erase",
            Operation::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The states one operation walked through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaReport {
    pub operation: Operation,
    pub states: Vec<SagaState>,
}

impl SagaReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            states: Vec::new(),
        }
    }

    /// Records a transition. Illegal transitions are logged and still recorded.
    pub fn enter(&mut self, state: SagaState) {
        if let Some(current) = self.current()
            && !current.can_transition_to(state)
        {
            tracing::error!(
                operation = %self.operation,
                from = %current,
                to = %state,
                "illegal saga transition"
            );
        }
        self.states.push(state);
    }

    pub fn current(&self) -> Option<SagaState> {
        self.states.last().copied()
    }

    /// Returns true if compensation ran.
    pub fn compensated(&self) -> bool {
        self.states.contains(&SagaState::Compensating)
    }
}

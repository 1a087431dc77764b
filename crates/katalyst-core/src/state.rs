//! Persisted workflow state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable lifecycle status of a workflow
///
/// The status is monotone along this graph:
/// STARTED -> {COMMITTED, FAILED}; FAILED -> {UNDONE, FAILED_UNDO}.
/// COMMITTED, UNDONE and FAILED_UNDO are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Transaction opened, outcome unresolved
    Started,

    /// Transaction committed
    Committed,

    /// Transaction rolled back or observed failed
    Failed,

    /// All recorded operations were reversed
    Undone,

    /// Reversal was attempted and did not fully succeed
    FailedUndo,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Undone | Self::FailedUndo)
    }

    /// Legal durable-state transitions per the lifecycle graph
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::Committed)
                | (Self::Started, Self::Failed)
                | (Self::Failed, Self::Undone)
                | (Self::Failed, Self::FailedUndo)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Committed => "COMMITTED",
            Self::Failed => "FAILED",
            Self::Undone => "UNDONE",
            Self::FailedUndo => "FAILED_UNDO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(Self::Started),
            "COMMITTED" => Some(Self::Committed),
            "FAILED" => Some(Self::Failed),
            "UNDONE" => Some(Self::Undone),
            "FAILED_UNDO" => Some(Self::FailedUndo),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the workflow-state table
///
/// `failed_at_operation` is set iff `status` is FAILED or FAILED_UNDO and a
/// failing operation index is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// UUID string identifying the workflow (never reused)
    pub workflow_id: String,

    /// Human-readable workflow name
    pub workflow_name: String,

    pub status: WorkflowStatus,

    /// Number of operations logged for this workflow
    pub total_operations: i32,

    /// Index of the first failing operation, when known
    pub failed_at_operation: Option<i32>,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

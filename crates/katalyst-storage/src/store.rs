//! Storage contracts for the operation log, workflow state and event dedup

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use katalyst_core::{NewOperation, Operation, WorkflowRecord};

/// Longest error message persisted alongside an operation or workflow.
/// Longer strings are truncated before the write.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2048;

/// Truncate an error message to the persisted bound
pub fn clamp_error_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Operation not found
    #[error("operation not found: {workflow_id}[{operation_index}]")]
    OperationNotFound {
        workflow_id: String,
        operation_index: i32,
    },

    /// Status change not allowed from the row's current status
    #[error("illegal status transition for {workflow_id}[{operation_index}]: {from} -> {to}")]
    IllegalTransition {
        workflow_id: String,
        operation_index: i32,
        from: String,
        to: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable append-only record of repository operations, keyed by workflow
///
/// `operation_index` is the sole ordering key within a workflow; callers
/// must not rely on `created_at` for intra-workflow ordering.
///
/// The framework's call sites treat write failures as log-and-continue and
/// read failures as empty results - a broken log never takes down the
/// transaction it describes.
#[async_trait]
pub trait OperationLogStore: Send + Sync + 'static {
    /// Append a PENDING row
    async fn log_operation(&self, operation: NewOperation) -> Result<(), StoreError>;

    /// All PENDING rows for a workflow, ascending `operation_index`
    async fn get_pending_operations(&self, workflow_id: &str)
        -> Result<Vec<Operation>, StoreError>;

    /// All rows for a workflow regardless of status, ascending `operation_index`
    async fn get_all_operations(&self, workflow_id: &str) -> Result<Vec<Operation>, StoreError>;

    /// Set status COMMITTED and stamp `committed_at` for one operation
    async fn mark_as_committed(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError>;

    /// Set status COMMITTED for every PENDING row of a workflow
    async fn mark_all_as_committed(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Set status UNDONE and stamp `undone_at`
    async fn mark_as_undone(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError>;

    /// Set status FAILED and record the (truncated) error message
    async fn mark_as_failed(
        &self,
        workflow_id: &str,
        operation_index: i32,
        error: &str,
    ) -> Result<(), StoreError>;

    /// FAILED rows across all workflows, ordered by `created_at`
    async fn get_failed_operations(&self) -> Result<Vec<Operation>, StoreError>;

    /// Remove rows created at or before the cutoff whose status is not
    /// PENDING. PENDING rows are never reaped - stale ones indicate
    /// orphaned work that needs manual review.
    async fn delete_old_operations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Durable lifecycle state per workflow
///
/// Writes never block the enclosing transaction's success path; the
/// framework logs and swallows recoverable errors at the call site.
#[async_trait]
pub trait WorkflowStateStore: Send + Sync + 'static {
    /// Insert a STARTED row
    async fn start_workflow(&self, workflow_id: &str, workflow_name: &str)
        -> Result<(), StoreError>;

    /// STARTED -> COMMITTED; stamps `completed_at` and the final operation count
    async fn commit_workflow(
        &self,
        workflow_id: &str,
        total_operations: i32,
    ) -> Result<(), StoreError>;

    /// STARTED -> FAILED; records the first failing operation index when known
    async fn fail_workflow(
        &self,
        workflow_id: &str,
        failed_at_operation: Option<i32>,
        error_message: &str,
    ) -> Result<(), StoreError>;

    /// FAILED -> UNDONE; stamps `completed_at`
    async fn mark_as_undone(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// FAILED -> FAILED_UNDO; records the undo failure
    async fn mark_undo_failed(&self, workflow_id: &str, error: &str) -> Result<(), StoreError>;

    async fn get_workflow_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRecord>, StoreError>;

    /// FAILED and FAILED_UNDO workflows, ordered by `created_at`
    async fn get_failed_workflows(&self) -> Result<Vec<WorkflowRecord>, StoreError>;

    /// Remove COMMITTED rows created at or before the cutoff
    async fn delete_old_workflows(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Marker store remembering which event ids were already published
///
/// Within one process instance, a mark must be visible to every subsequent
/// read. Implementations may persist or stay in memory.
#[async_trait]
pub trait PublishedEventStore: Send + Sync + 'static {
    async fn is_event_published(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Idempotent: re-marking an already-published id keeps the original
    /// timestamp and is not an error
    async fn mark_as_published(
        &self,
        event_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove markers published strictly before the cutoff; returns how
    /// many were deleted
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn published_count(&self) -> Result<u64, StoreError>;

    /// How many markers carry a publish timestamp strictly before the cutoff
    async fn published_count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

//! In-memory store implementations
//!
//! Primarily for testing: same semantics as the PostgreSQL backend, all
//! data held in process memory behind `parking_lot` locks.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use katalyst_core::{
    NewOperation, Operation, OperationStatus, WorkflowRecord, WorkflowStatus,
};

use super::store::{
    clamp_error_message, OperationLogStore, PublishedEventStore, StoreError, WorkflowStateStore,
};

/// In-memory implementation of [`OperationLogStore`]
///
/// Operations are kept per workflow in a `BTreeMap` keyed by
/// `operation_index`, which gives the ascending-index ordering for free.
pub struct InMemoryOperationLog {
    workflows: RwLock<HashMap<String, BTreeMap<i32, Operation>>>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Total operations across all workflows (for tests)
    pub fn operation_count(&self) -> usize {
        self.workflows.read().values().map(|ops| ops.len()).sum()
    }

    /// Clear all data (for tests)
    pub fn clear(&self) {
        self.workflows.write().clear();
    }
}

impl Default for InMemoryOperationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationLogStore for InMemoryOperationLog {
    async fn log_operation(&self, operation: NewOperation) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let ops = workflows
            .entry(operation.workflow_id.clone())
            .or_default();

        if ops.contains_key(&operation.operation_index) {
            return Err(StoreError::Database(format!(
                "duplicate operation index {} for workflow {}",
                operation.operation_index, operation.workflow_id
            )));
        }

        let row = operation.into_pending(Utc::now());
        ops.insert(row.operation_index, row);
        Ok(())
    }

    async fn get_pending_operations(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<Operation>, StoreError> {
        let workflows = self.workflows.read();
        Ok(workflows
            .get(workflow_id)
            .map(|ops| {
                ops.values()
                    .filter(|op| op.status == OperationStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_all_operations(&self, workflow_id: &str) -> Result<Vec<Operation>, StoreError> {
        let workflows = self.workflows.read();
        Ok(workflows
            .get(workflow_id)
            .map(|ops| ops.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_as_committed(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError> {
        self.update_status(workflow_id, operation_index, OperationStatus::Committed, None)
    }

    async fn mark_all_as_committed(&self, workflow_id: &str) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if let Some(ops) = workflows.get_mut(workflow_id) {
            let now = Utc::now();
            for op in ops.values_mut() {
                if op.status == OperationStatus::Pending {
                    op.status = OperationStatus::Committed;
                    op.committed_at = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn mark_as_undone(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError> {
        self.update_status(workflow_id, operation_index, OperationStatus::Undone, None)
    }

    async fn mark_as_failed(
        &self,
        workflow_id: &str,
        operation_index: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update_status(
            workflow_id,
            operation_index,
            OperationStatus::Failed,
            Some(clamp_error_message(error)),
        )
    }

    async fn get_failed_operations(&self) -> Result<Vec<Operation>, StoreError> {
        let workflows = self.workflows.read();
        let mut failed: Vec<Operation> = workflows
            .values()
            .flat_map(|ops| ops.values())
            .filter(|op| op.status == OperationStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|op| op.created_at);
        Ok(failed)
    }

    async fn delete_old_operations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut workflows = self.workflows.write();
        let mut deleted = 0u64;

        for ops in workflows.values_mut() {
            let before = ops.len();
            ops.retain(|_, op| {
                op.status == OperationStatus::Pending || op.created_at > cutoff
            });
            deleted += (before - ops.len()) as u64;
        }
        workflows.retain(|_, ops| !ops.is_empty());

        Ok(deleted)
    }
}

impl InMemoryOperationLog {
    fn update_status(
        &self,
        workflow_id: &str,
        operation_index: i32,
        next: OperationStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let op = workflows
            .get_mut(workflow_id)
            .and_then(|ops| ops.get_mut(&operation_index))
            .ok_or_else(|| StoreError::OperationNotFound {
                workflow_id: workflow_id.to_string(),
                operation_index,
            })?;

        if !op.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                workflow_id: workflow_id.to_string(),
                operation_index,
                from: op.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        op.status = next;
        match next {
            OperationStatus::Committed => op.committed_at = Some(now),
            OperationStatus::Undone => op.undone_at = Some(now),
            OperationStatus::Failed => {
                op.error_message = error;
                op.last_error_at = Some(now);
            }
            OperationStatus::Pending => {}
        }
        Ok(())
    }
}

/// In-memory implementation of [`WorkflowStateStore`]
pub struct InMemoryWorkflowStateStore {
    workflows: RwLock<HashMap<String, WorkflowRecord>>,
}

impl InMemoryWorkflowStateStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored workflows (for tests)
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Insert a pre-built record directly (for tests seeding failed state)
    pub fn seed(&self, record: WorkflowRecord) {
        self.workflows
            .write()
            .insert(record.workflow_id.clone(), record);
    }
}

impl Default for InMemoryWorkflowStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowStateStore {
    fn update<F>(&self, workflow_id: &str, next: WorkflowStatus, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut WorkflowRecord),
    {
        let mut workflows = self.workflows.write();
        let record = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        if !record.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                workflow_id: workflow_id.to_string(),
                operation_index: -1,
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }

        record.status = next;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl WorkflowStateStore for InMemoryWorkflowStateStore {
    async fn start_workflow(
        &self,
        workflow_id: &str,
        workflow_name: &str,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(workflow_id) {
            return Err(StoreError::Database(format!(
                "workflow id reused: {workflow_id}"
            )));
        }

        workflows.insert(
            workflow_id.to_string(),
            WorkflowRecord {
                workflow_id: workflow_id.to_string(),
                workflow_name: workflow_name.to_string(),
                status: WorkflowStatus::Started,
                total_operations: 0,
                failed_at_operation: None,
                error_message: None,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(())
    }

    async fn commit_workflow(
        &self,
        workflow_id: &str,
        total_operations: i32,
    ) -> Result<(), StoreError> {
        self.update(workflow_id, WorkflowStatus::Committed, |record| {
            record.total_operations = total_operations;
            record.completed_at = Some(Utc::now());
        })
    }

    async fn fail_workflow(
        &self,
        workflow_id: &str,
        failed_at_operation: Option<i32>,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let message = clamp_error_message(error_message);
        self.update(workflow_id, WorkflowStatus::Failed, |record| {
            record.failed_at_operation = failed_at_operation;
            record.total_operations = failed_at_operation.map(|i| i + 1).unwrap_or(0);
            record.error_message = Some(message);
        })
    }

    async fn mark_as_undone(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.update(workflow_id, WorkflowStatus::Undone, |record| {
            // The failure fields only accompany FAILED/FAILED_UNDO
            record.failed_at_operation = None;
            record.error_message = None;
            record.completed_at = Some(Utc::now());
        })
    }

    async fn mark_undo_failed(&self, workflow_id: &str, error: &str) -> Result<(), StoreError> {
        let message = clamp_error_message(error);
        self.update(workflow_id, WorkflowStatus::FailedUndo, |record| {
            record.error_message = Some(message);
            record.completed_at = Some(Utc::now());
        })
    }

    async fn get_workflow_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        Ok(self.workflows.read().get(workflow_id).cloned())
    }

    async fn get_failed_workflows(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        let workflows = self.workflows.read();
        let mut failed: Vec<WorkflowRecord> = workflows
            .values()
            .filter(|record| {
                matches!(
                    record.status,
                    WorkflowStatus::Failed | WorkflowStatus::FailedUndo
                )
            })
            .cloned()
            .collect();
        failed.sort_by_key(|record| record.created_at);
        Ok(failed)
    }

    async fn delete_old_workflows(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut workflows = self.workflows.write();
        let before = workflows.len();
        workflows.retain(|_, record| {
            record.status != WorkflowStatus::Committed || record.created_at > cutoff
        });
        Ok((before - workflows.len()) as u64)
    }
}

/// In-memory implementation of [`PublishedEventStore`]
pub struct InMemoryPublishedEventStore {
    published: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryPublishedEventStore {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-mark an event id (for tests simulating a prior attempt)
    pub fn seed(&self, event_id: &str, published_at: DateTime<Utc>) {
        self.published
            .write()
            .insert(event_id.to_string(), published_at);
    }
}

impl Default for InMemoryPublishedEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublishedEventStore for InMemoryPublishedEventStore {
    async fn is_event_published(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.published.read().contains_key(event_id))
    }

    async fn mark_as_published(
        &self,
        event_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.published
            .write()
            .entry(event_id.to_string())
            .or_insert(published_at);
        Ok(())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut published = self.published.write();
        let before = published.len();
        published.retain(|_, at| *at >= cutoff);
        Ok((before - published.len()) as u64)
    }

    async fn published_count(&self) -> Result<u64, StoreError> {
        Ok(self.published.read().len() as u64)
    }

    async fn published_count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .published
            .read()
            .values()
            .filter(|at| **at < cutoff)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use katalyst_core::OperationType;

    fn op(workflow_id: &str, index: i32) -> NewOperation {
        NewOperation::new(workflow_id, index, OperationType::Insert, "User")
            .with_resource_id(format!("user-{index}"))
    }

    #[tokio::test]
    async fn test_log_and_read_in_index_order() {
        let log = InMemoryOperationLog::new();

        // Insert out of order; reads must come back ascending
        log.log_operation(op("wf-1", 2)).await.unwrap();
        log.log_operation(op("wf-1", 0)).await.unwrap();
        log.log_operation(op("wf-1", 1)).await.unwrap();

        let all = log.get_all_operations("wf-1").await.unwrap();
        let indexes: Vec<i32> = all.iter().map(|o| o.operation_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_index_rejected() {
        let log = InMemoryOperationLog::new();
        log.log_operation(op("wf-1", 0)).await.unwrap();

        let err = log.log_operation(op("wf-1", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn test_commit_and_undo_lifecycle() {
        let log = InMemoryOperationLog::new();
        log.log_operation(op("wf-1", 0)).await.unwrap();
        log.log_operation(op("wf-1", 1)).await.unwrap();

        log.mark_all_as_committed("wf-1").await.unwrap();
        assert!(log.get_pending_operations("wf-1").await.unwrap().is_empty());

        let all = log.get_all_operations("wf-1").await.unwrap();
        assert!(all
            .iter()
            .all(|o| o.status == OperationStatus::Committed && o.committed_at.is_some()));

        log.mark_as_undone("wf-1", 1).await.unwrap();
        let all = log.get_all_operations("wf-1").await.unwrap();
        assert_eq!(all[1].status, OperationStatus::Undone);
        assert!(all[1].undone_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_operation_transition_rejected() {
        let log = InMemoryOperationLog::new();
        log.log_operation(op("wf-1", 0)).await.unwrap();

        // PENDING -> UNDONE is not legal
        let err = log.mark_as_undone("wf-1", 0).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_pending_rows_survive_reaping() {
        let log = InMemoryOperationLog::new();
        log.log_operation(op("wf-1", 0)).await.unwrap();
        log.log_operation(op("wf-1", 1)).await.unwrap();
        log.mark_as_committed("wf-1", 0).await.unwrap();

        let future = Utc::now() + Duration::hours(1);
        let deleted = log.delete_old_operations(future).await.unwrap();

        assert_eq!(deleted, 1);
        let remaining = log.get_all_operations("wf-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_operations_across_workflows() {
        let log = InMemoryOperationLog::new();
        log.log_operation(op("wf-1", 0)).await.unwrap();
        log.log_operation(op("wf-2", 0)).await.unwrap();
        log.mark_as_failed("wf-2", 0, "boom").await.unwrap();

        let failed = log.get_failed_operations().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].workflow_id, "wf-2");
        assert_eq!(failed[0].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_workflow_state_lifecycle() {
        let store = InMemoryWorkflowStateStore::new();
        store.start_workflow("wf-1", "register-user").await.unwrap();

        let record = store.get_workflow_state("wf-1").await.unwrap().unwrap();
        assert_eq!(record.status, WorkflowStatus::Started);
        assert!(record.completed_at.is_none());

        store.commit_workflow("wf-1", 3).await.unwrap();
        let record = store.get_workflow_state("wf-1").await.unwrap().unwrap();
        assert_eq!(record.status, WorkflowStatus::Committed);
        assert_eq!(record.total_operations, 3);
        assert!(record.completed_at.is_some());

        // Terminal: a second commit is illegal
        let err = store.commit_workflow("wf-1", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_workflow_id_never_reused() {
        let store = InMemoryWorkflowStateStore::new();
        store.start_workflow("wf-1", "a").await.unwrap();
        assert!(store.start_workflow("wf-1", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_workflow_queries() {
        let store = InMemoryWorkflowStateStore::new();
        store.start_workflow("wf-1", "a").await.unwrap();
        store.start_workflow("wf-2", "b").await.unwrap();
        store.start_workflow("wf-3", "c").await.unwrap();

        store.fail_workflow("wf-1", Some(2), "boom").await.unwrap();
        store.fail_workflow("wf-2", None, "boom").await.unwrap();
        store.mark_undo_failed("wf-2", "undo failed").await.unwrap();
        store.commit_workflow("wf-3", 1).await.unwrap();

        let failed = store.get_failed_workflows().await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .any(|r| r.status == WorkflowStatus::FailedUndo));

        let wf1 = store.get_workflow_state("wf-1").await.unwrap().unwrap();
        assert_eq!(wf1.failed_at_operation, Some(2));
        assert_eq!(wf1.total_operations, 3);
    }

    #[tokio::test]
    async fn test_mark_as_undone_clears_failure_fields() {
        let store = InMemoryWorkflowStateStore::new();
        store.start_workflow("wf-1", "a").await.unwrap();
        store.fail_workflow("wf-1", Some(2), "boom").await.unwrap();

        store.mark_as_undone("wf-1").await.unwrap();

        let record = store.get_workflow_state("wf-1").await.unwrap().unwrap();
        assert_eq!(record.status, WorkflowStatus::Undone);
        assert_eq!(record.failed_at_operation, None);
        assert_eq!(record.error_message, None);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_old_workflows_only_committed() {
        let store = InMemoryWorkflowStateStore::new();
        store.start_workflow("wf-1", "a").await.unwrap();
        store.start_workflow("wf-2", "b").await.unwrap();
        store.commit_workflow("wf-1", 0).await.unwrap();
        store.fail_workflow("wf-2", None, "boom").await.unwrap();

        let future = Utc::now() + Duration::hours(1);
        let deleted = store.delete_old_workflows(future).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_workflow_state("wf-1").await.unwrap().is_none());
        assert!(store.get_workflow_state("wf-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_as_published_is_idempotent() {
        let store = InMemoryPublishedEventStore::new();
        let first = Utc::now();
        let later = first + Duration::seconds(30);

        store.mark_as_published("evt-1", first).await.unwrap();
        store.mark_as_published("evt-1", later).await.unwrap();

        assert!(store.is_event_published("evt-1").await.unwrap());
        assert_eq!(store.published_count().await.unwrap(), 1);
        // Original timestamp wins
        assert_eq!(
            store
                .published_count_before(first + Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_published_before() {
        let store = InMemoryPublishedEventStore::new();
        let now = Utc::now();
        store
            .mark_as_published("old", now - Duration::hours(2))
            .await
            .unwrap();
        store.mark_as_published("new", now).await.unwrap();

        let deleted = store
            .delete_published_before(now - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(!store.is_event_published("old").await.unwrap());
        assert!(store.is_event_published("new").await.unwrap());
    }
}

//! Tracked repositories
//!
//! A repository participates in workflow tracking by wrapping each mutating
//! operation in [`OperationTracker::tracked`]. The wrapper runs the body,
//! reads the ambient workflow context, and - when a transaction is active -
//! emits an operation-log entry without waiting on the write. The body's
//! result is returned untouched in every case; a broken log never changes
//! what the repository hands back.

use std::sync::Arc;

use tracing::{debug, warn};

use katalyst_core::{NewOperation, OperationType};
use katalyst_storage::OperationLogStore;

use crate::txn::current_transaction;

/// Describes one tracked operation: what happened and how to reverse it
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub operation_type: OperationType,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub operation_data: Option<serde_json::Value>,
    pub undo_data: Option<serde_json::Value>,
}

impl OperationDescriptor {
    pub fn new(operation_type: OperationType, resource_type: impl Into<String>) -> Self {
        Self {
            operation_type,
            resource_type: resource_type.into(),
            resource_id: None,
            operation_data: None,
            undo_data: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Describe the forward change (opaque to the framework)
    pub fn with_operation_data(mut self, data: serde_json::Value) -> Self {
        self.operation_data = Some(data);
        self
    }

    /// Capture everything the undo strategy will need
    pub fn with_undo_data(mut self, data: serde_json::Value) -> Self {
        self.undo_data = Some(data);
        self
    }
}

/// Emits operation-log entries for tracked repository calls
pub struct OperationTracker {
    log: Arc<dyn OperationLogStore>,
}

impl OperationTracker {
    pub fn new(log: Arc<dyn OperationLogStore>) -> Self {
        Self { log }
    }

    /// Run a repository operation under tracking
    ///
    /// The body executes first and its result is retained. If the current
    /// task is inside a transaction, the next operation index is claimed
    /// and a PENDING entry is emitted fire-and-forget; log failures are
    /// logged and swallowed. Outside a transaction the body simply runs.
    pub async fn tracked<T, F, Fut>(&self, descriptor: OperationDescriptor, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let result = body().await;

        if let Some(ctx) = current_transaction() {
            let operation_index = ctx.allocate_operation_index();
            let mut operation = NewOperation::new(
                ctx.workflow_id(),
                operation_index,
                descriptor.operation_type,
                descriptor.resource_type,
            );
            operation.resource_id = descriptor.resource_id;
            operation.operation_data = descriptor.operation_data;
            operation.undo_data = descriptor.undo_data;

            let log = Arc::clone(&self.log);
            let handle = tokio::spawn(async move {
                let workflow_id = operation.workflow_id.clone();
                if let Err(err) = log.log_operation(operation).await {
                    warn!(%workflow_id, operation_index, "failed to log operation: {err}");
                }
            });
            ctx.track_log_write(handle);
        } else {
            debug!("repository call outside a transaction, not tracked");
        }

        result
    }
}

/// Derive a resource-type name from a repository type name
///
/// Strips module path and a trailing "Repository"; falls back to "Unknown"
/// when nothing remains.
pub fn resource_type_from<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let name = full.rsplit("::").next().unwrap_or(full);
    let stripped = name.strip_suffix("Repository").unwrap_or(name);
    if stripped.is_empty() {
        "Unknown".to_string()
    } else {
        stripped.to_string()
    }
}

/// Contract a repository satisfies to participate in workflow tracking
///
/// Implementors expose their tracker and get the naming convention for
/// free; every mutating method goes through `self.tracker().tracked(...)`.
pub trait TrackedRepository {
    fn tracker(&self) -> &OperationTracker;

    /// Resource type recorded when the caller does not name one
    fn resource_type(&self) -> String
    where
        Self: Sized,
    {
        resource_type_from::<Self>()
    }
}

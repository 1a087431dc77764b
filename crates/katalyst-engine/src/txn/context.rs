//! Per-transaction context and the ambient workflow slot
//!
//! The "current workflow id" must be visible to repository code called
//! transitively from a transaction body without being threaded through
//! every signature. That slot is a `tokio::task_local!` - never a
//! process-wide singleton - so concurrent transactions cannot corrupt each
//! other's logs. The coordinator installs the context for the duration of
//! the transaction future; when that future ends (normally or not) the slot
//! is gone with it.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use katalyst_core::DomainEvent;

tokio::task_local! {
    static CURRENT_TRANSACTION: Arc<TransactionContext>;
}

/// The ambient transaction context, if the current task runs inside one
pub fn current_transaction() -> Option<Arc<TransactionContext>> {
    CURRENT_TRANSACTION.try_with(Arc::clone).ok()
}

/// Run a future with the given context installed in the ambient slot
///
/// Used by the coordinator; exposed for tests that exercise tracked
/// repositories without a full coordinator.
pub async fn with_transaction<F: Future>(context: Arc<TransactionContext>, fut: F) -> F::Output {
    CURRENT_TRANSACTION.scope(context, fut).await
}

/// Scratch space for the events queued during one transaction
///
/// A FIFO of pending domain events plus free-form metadata. Owned by
/// exactly one transaction; created at AFTER_BEGIN setup and discarded
/// when the transaction ends.
pub struct TransactionEventContext {
    pending: Mutex<VecDeque<Arc<dyn DomainEvent>>>,
    attributes: Mutex<HashMap<String, serde_json::Value>>,
}

impl TransactionEventContext {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Append an event to the pending queue
    pub fn queue_event(&self, event: Arc<dyn DomainEvent>) {
        self.pending.lock().push_back(event);
    }

    /// Snapshot of the pending queue in FIFO order
    pub fn pending_events(&self) -> Vec<Arc<dyn DomainEvent>> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn clear_pending_events(&self) {
        self.pending.lock().clear();
    }

    /// Store a metadata value for the rest of the transaction
    pub fn set_attribute(&self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.lock().insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes.lock().get(key).cloned()
    }
}

impl Default for TransactionEventContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a transaction carries through its lifetime
///
/// One instance per top-level transaction; nested transaction calls inherit
/// it. The same instance is visible to all adapters and the user body.
pub struct TransactionContext {
    workflow_id: String,
    workflow_name: String,
    events: TransactionEventContext,
    next_operation_index: AtomicI32,
    log_writes: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TransactionContext {
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            events: TransactionEventContext::new(),
            next_operation_index: AtomicI32::new(0),
            log_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// The event scratch space shared by adapters and the user body
    pub fn events(&self) -> &TransactionEventContext {
        &self.events
    }

    /// Claim the next operation index (0-based, monotonically increasing)
    pub fn allocate_operation_index(&self) -> i32 {
        self.next_operation_index.fetch_add(1, Ordering::SeqCst)
    }

    /// Highest index handed out so far, or `None` when nothing was logged
    pub fn highest_logged_index(&self) -> Option<i32> {
        match self.next_operation_index.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n - 1),
        }
    }

    /// Number of operation indexes handed out
    pub fn operation_count(&self) -> i32 {
        self.next_operation_index.load(Ordering::SeqCst)
    }

    /// Track an in-flight fire-and-forget operation-log write
    pub fn track_log_write(&self, handle: tokio::task::JoinHandle<()>) {
        self.log_writes.lock().push(handle);
    }

    /// Wait for all in-flight log writes to land
    ///
    /// Repositories never wait on their log writes; the coordinator drains
    /// them once, at transaction resolution, so status updates see every
    /// row.
    pub async fn drain_log_writes(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.log_writes.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

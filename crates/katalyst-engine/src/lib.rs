//! # Katalyst Engine
//!
//! Transactional workflow orchestration with durable recovery.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                      │
//! │  (phased lifecycle, ambient workflow context, rollback)     │
//! └─────────────────────────────────────────────────────────────┘
//!           │                    │                      │
//!           ▼                    ▼                      ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────┐
//! │  AdapterRegistry │ │ OperationTracker │ │ EventsTxnAdapter     │
//! │  (prioritized,   │ │ (fire-and-forget │ │ (validate, dedup,    │
//! │   fail-fast /    │ │  operation log)  │ │  publish post-body)  │
//! │   best-effort)   │ └──────────────────┘ └──────────────────────┘
//! └──────────────────┘           │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          UndoEngine + RecoveryScheduler + HealthMonitor      │
//! │  (LIFO compensation, periodic failed-workflow scanning)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use katalyst_engine::prelude::*;
//!
//! let coordinator = TransactionCoordinator::new(db, adapters, operation_log, workflow_store);
//!
//! let user = coordinator
//!     .transaction("register-user", || async {
//!         let user = users.create(new_user).await?;
//!         if let Some(ctx) = current_transaction() {
//!             ctx.events().queue_event(Arc::new(UserRegistered::new(&user)));
//!         }
//!         Ok(user)
//!     })
//!     .await?;
//! ```

pub mod composer;
pub mod events;
pub mod recovery;
pub mod repository;
pub mod txn;
pub mod undo;

/// Prelude for common imports
pub mod prelude {
    pub use crate::composer::{ComposedWorkflow, RunStatus, StepResult, WorkflowComposer};
    pub use crate::events::{
        EventPublishingValidator, EventValidationFailed, EventValidationResult,
        EventsTransactionAdapter,
    };
    pub use crate::recovery::{
        HealthCheckResult, HealthIssue, HealthMonitor, HealthStatus, HealthThresholds,
        IssueSeverity, RecoveryAttempt, RecoveryConfig, RecoveryJob, RecoveryMetricsSnapshot,
        RecoveryScanResult, RecoveryScheduler, RecoveryStrategy, WorkflowResumer,
    };
    pub use crate::repository::{OperationDescriptor, OperationTracker, TrackedRepository};
    pub use crate::txn::{
        current_transaction, AdapterError, AdapterRegistry, DatabaseTransaction, ExecutionMode,
        NoopDatabase, PhaseExecutionResults, PostgresDatabase, TransactionAdapter,
        TransactionContext, TransactionCoordinator, TransactionError, TransactionPhase,
        TransactionalDatabase,
    };
    pub use crate::undo::{
        CompensationClient, ResourceStore, RetryPolicy, RetryScope, UndoEngine, UndoError,
        UndoResult, UndoStrategy, UndoStrategyRegistry,
    };
    pub use katalyst_core::{
        DomainEvent, EventBus, EventMetadata, GenericEvent, NewOperation, Operation,
        OperationStatus, OperationType, WorkflowMachine, WorkflowRecord, WorkflowStatus,
        WorkflowTransition,
    };
    pub use katalyst_storage::{
        InMemoryOperationLog, InMemoryPublishedEventStore, InMemoryWorkflowStateStore,
        OperationLogStore, PublishedEventStore, StoreError, WorkflowStateStore,
    };
}

// Re-export key types at crate root
pub use composer::{ComposedWorkflow, WorkflowComposer};
pub use events::EventsTransactionAdapter;
pub use recovery::{HealthMonitor, RecoveryJob, RecoveryScheduler};
pub use repository::{OperationTracker, TrackedRepository};
pub use txn::{
    current_transaction, AdapterRegistry, TransactionAdapter, TransactionContext,
    TransactionCoordinator, TransactionError, TransactionPhase,
};
pub use undo::{RetryPolicy, UndoEngine, UndoStrategyRegistry};

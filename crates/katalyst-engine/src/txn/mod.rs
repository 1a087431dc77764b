//! Phased transaction execution
//!
//! A transaction walks an ordered set of phases; registered adapters are
//! notified at each one. The successful path is BEFORE_BEGIN, AFTER_BEGIN,
//! BEFORE_COMMIT_VALIDATION, BEFORE_COMMIT, AFTER_COMMIT; on failure,
//! everything after the failing phase is replaced by ON_ROLLBACK and
//! AFTER_ROLLBACK.

mod adapter;
mod context;
mod coordinator;
mod phase;
mod registry;

pub use adapter::{AdapterError, TransactionAdapter};
pub use context::{
    current_transaction, with_transaction, TransactionContext, TransactionEventContext,
};
pub use coordinator::{
    DatabaseTransaction, NoopDatabase, PostgresDatabase, TransactionCoordinator, TransactionError,
    TransactionalDatabase,
};
pub use phase::TransactionPhase;
pub use registry::{AdapterPhaseResult, AdapterRegistry, ExecutionMode, PhaseExecutionResults};

//! Phased transaction coordinator
//!
//! The coordinator owns the lifecycle of one database transaction plus its
//! surrounding adapter phases:
//!
//! ```text
//! BEFORE_BEGIN → begin → AFTER_BEGIN → start workflow → user body
//!   → BEFORE_COMMIT_VALIDATION → BEFORE_COMMIT → commit → AFTER_COMMIT
//! ```
//!
//! Any failure from the body or a critical adapter switches to the rollback
//! path: rollback → ON_ROLLBACK → AFTER_ROLLBACK → record the failure →
//! surface the original error. The ambient workflow slot is installed for
//! exactly the lifetime of the transaction future, so it is cleared even on
//! programmer error.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use katalyst_storage::{OperationLogStore, WorkflowStateStore};

use super::adapter::AdapterError;
use super::context::{current_transaction, with_transaction, TransactionContext};
use super::phase::TransactionPhase;
use super::registry::{AdapterRegistry, ExecutionMode};

/// A single open database transaction
///
/// The transaction owns exactly one connection; no inner call may acquire a
/// second one.
#[async_trait]
pub trait DatabaseTransaction: Send {
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// The underlying transactional store
#[async_trait]
pub trait TransactionalDatabase: Send + Sync + 'static {
    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseTransaction>>;
}

/// PostgreSQL-backed [`TransactionalDatabase`]
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgTxn {
    inner: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl DatabaseTransaction for PgTxn {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionalDatabase for PostgresDatabase {
    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseTransaction>> {
        let inner = self.pool.begin().await?;
        Ok(Box::new(PgTxn { inner }))
    }
}

#[derive(Default)]
struct NoopCounters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// In-memory [`TransactionalDatabase`] that only counts begin/commit/rollback
///
/// The test fixture for exercising the coordinator without Postgres. Can be
/// told to fail its next commit to simulate a driver error.
pub struct NoopDatabase {
    counters: Arc<NoopCounters>,
    fail_commit: Arc<std::sync::atomic::AtomicBool>,
}

impl NoopDatabase {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(NoopCounters::default()),
            fail_commit: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn begin_count(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Make every subsequent commit fail (for tests)
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }
}

impl Default for NoopDatabase {
    fn default() -> Self {
        Self::new()
    }
}

struct NoopTxn {
    counters: Arc<NoopCounters>,
    fail_commit: bool,
}

#[async_trait]
impl DatabaseTransaction for NoopTxn {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        if self.fail_commit {
            anyhow::bail!("commit refused by test database");
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionalDatabase for NoopDatabase {
    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseTransaction>> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NoopTxn {
            counters: Arc::clone(&self.counters),
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
        }))
    }
}

/// Error surfaced to the caller of [`TransactionCoordinator::transaction`]
///
/// The original failure is always reachable: the user body's error in
/// `Body`, the adapter's underlying error as the `source` of
/// `CriticalAdapter`.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The user body returned an error; the transaction was rolled back
    #[error("transaction body failed: {0}")]
    Body(#[source] anyhow::Error),

    /// A critical adapter failed in a fail-fast phase; rolled back
    #[error("critical adapter '{adapter}' failed in {phase}: {source}")]
    CriticalAdapter {
        adapter: String,
        phase: TransactionPhase,
        #[source]
        source: AdapterError,
    },

    /// The database driver failed to begin, commit or roll back
    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),
}

/// The central orchestrator: one call, one database transaction, one workflow
///
/// # Example
///
/// ```ignore
/// let value = coordinator
///     .transaction("register-user", || async {
///         // repository calls + event queueing
///         Ok(42)
///     })
///     .await?;
/// ```
pub struct TransactionCoordinator {
    db: Arc<dyn TransactionalDatabase>,
    adapters: Arc<AdapterRegistry>,
    operation_log: Arc<dyn OperationLogStore>,
    workflow_store: Arc<dyn WorkflowStateStore>,
}

impl TransactionCoordinator {
    pub fn new(
        db: Arc<dyn TransactionalDatabase>,
        adapters: Arc<AdapterRegistry>,
        operation_log: Arc<dyn OperationLogStore>,
        workflow_store: Arc<dyn WorkflowStateStore>,
    ) -> Self {
        Self {
            db,
            adapters,
            operation_log,
            workflow_store,
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Run a transaction with a freshly allocated workflow id
    pub async fn transaction<T, F, Fut>(
        &self,
        workflow_name: &str,
        body: F,
    ) -> Result<T, TransactionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.transaction_with_id(None, workflow_name, body).await
    }

    /// Run a transaction, optionally supplying the workflow id
    ///
    /// Nested calls (made from inside a transaction body on the same task)
    /// inherit the outer workflow id and context: they do not re-begin, do
    /// not touch workflow state, and simply run the body.
    #[instrument(skip(self, workflow_id, body), fields(workflow = workflow_name))]
    pub async fn transaction_with_id<T, F, Fut>(
        &self,
        workflow_id: Option<String>,
        workflow_name: &str,
        body: F,
    ) -> Result<T, TransactionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(outer) = current_transaction() {
            debug!(
                workflow_id = outer.workflow_id(),
                "nested transaction call, inheriting outer context"
            );
            return body().await.map_err(TransactionError::Body);
        }

        let workflow_id = workflow_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ctx = Arc::new(TransactionContext::new(&workflow_id, workflow_name));

        // The scope is the clearing guarantee: when this future ends, by any
        // path, the ambient slot is gone.
        with_transaction(Arc::clone(&ctx), self.run(ctx.clone(), body)).await
    }

    async fn run<T, F, Fut>(&self, ctx: Arc<TransactionContext>, body: F) -> Result<T, TransactionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let workflow_id = ctx.workflow_id().to_string();

        if let Some((adapter, source)) = self
            .fail_fast_phase(TransactionPhase::BeforeBegin, &ctx)
            .await
        {
            self.rollback_phases(&ctx).await;
            return Err(TransactionError::CriticalAdapter {
                adapter,
                phase: TransactionPhase::BeforeBegin,
                source,
            });
        }

        let txn = match self.db.begin().await {
            Ok(txn) => txn,
            Err(err) => {
                self.rollback_phases(&ctx).await;
                return Err(TransactionError::Database(err));
            }
        };

        if let Some((adapter, source)) = self
            .fail_fast_phase(TransactionPhase::AfterBegin, &ctx)
            .await
        {
            self.abort(txn, &ctx, false, "critical adapter failure in AFTER_BEGIN")
                .await;
            return Err(TransactionError::CriticalAdapter {
                adapter,
                phase: TransactionPhase::AfterBegin,
                source,
            });
        }

        if let Err(err) = self
            .workflow_store
            .start_workflow(&workflow_id, ctx.workflow_name())
            .await
        {
            // Never blocks the transaction; the log is the observer here
            warn!(%workflow_id, "failed to record workflow start: {err}");
        }

        let value = match body().await {
            Ok(value) => value,
            Err(err) => {
                self.abort(txn, &ctx, true, &err.to_string()).await;
                return Err(TransactionError::Body(err));
            }
        };

        if let Some((adapter, source)) = self
            .fail_fast_phase(TransactionPhase::BeforeCommitValidation, &ctx)
            .await
        {
            self.abort(txn, &ctx, true, &source.to_string()).await;
            return Err(TransactionError::CriticalAdapter {
                adapter,
                phase: TransactionPhase::BeforeCommitValidation,
                source,
            });
        }

        if let Some((adapter, source)) = self
            .fail_fast_phase(TransactionPhase::BeforeCommit, &ctx)
            .await
        {
            self.abort(txn, &ctx, true, &source.to_string()).await;
            return Err(TransactionError::CriticalAdapter {
                adapter,
                phase: TransactionPhase::BeforeCommit,
                source,
            });
        }

        if let Err(err) = txn.commit().await {
            // The transaction is gone either way; walk the rollback phases
            // and record the failure
            self.rollback_phases(&ctx).await;
            self.record_failure(&ctx, &err.to_string()).await;
            return Err(TransactionError::Database(err));
        }

        // Outside the database transaction: nothing here can un-commit
        self.adapters
            .execute_phase(TransactionPhase::AfterCommit, &ctx, ExecutionMode::BestEffort)
            .await;

        ctx.drain_log_writes().await;

        if let Err(err) = self
            .workflow_store
            .commit_workflow(&workflow_id, ctx.operation_count())
            .await
        {
            warn!(%workflow_id, "failed to record workflow commit: {err}");
        }
        if let Err(err) = self.operation_log.mark_all_as_committed(&workflow_id).await {
            warn!(%workflow_id, "failed to mark operations committed: {err}");
        }

        info!(%workflow_id, operations = ctx.operation_count(), "transaction committed");
        Ok(value)
    }

    /// Run a fail-fast phase, returning the first critical failure if any
    async fn fail_fast_phase(
        &self,
        phase: TransactionPhase,
        ctx: &TransactionContext,
    ) -> Option<(String, AdapterError)> {
        let mut results = self
            .adapters
            .execute_phase(phase, ctx, ExecutionMode::FailFast)
            .await;
        results.take_critical_failure()
    }

    /// Roll back and walk the failure path
    async fn abort(
        &self,
        txn: Box<dyn DatabaseTransaction>,
        ctx: &TransactionContext,
        workflow_started: bool,
        reason: &str,
    ) {
        if let Err(err) = txn.rollback().await {
            warn!(workflow_id = ctx.workflow_id(), "rollback failed: {err}");
        }
        self.rollback_phases(ctx).await;
        ctx.drain_log_writes().await;
        if workflow_started {
            self.record_failure(ctx, reason).await;
        }
    }

    async fn rollback_phases(&self, ctx: &TransactionContext) {
        for phase in [TransactionPhase::OnRollback, TransactionPhase::AfterRollback] {
            self.adapters
                .execute_phase(phase, ctx, ExecutionMode::BestEffort)
                .await;
        }
    }

    async fn record_failure(&self, ctx: &TransactionContext, reason: &str) {
        let failed_at = ctx.highest_logged_index();
        if let Err(err) = self
            .workflow_store
            .fail_workflow(ctx.workflow_id(), failed_at, reason)
            .await
        {
            warn!(
                workflow_id = ctx.workflow_id(),
                "failed to record workflow failure: {err}"
            );
        }
    }
}

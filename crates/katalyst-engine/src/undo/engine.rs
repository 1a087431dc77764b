//! Best-effort LIFO undo of a failed workflow

use std::sync::Arc;

use tracing::{info, instrument, warn};

use katalyst_core::{Operation, OperationType};

use super::retry::RetryPolicy;
use super::strategy::UndoStrategyRegistry;

/// Outcome of reversing one operation
#[derive(Debug, Clone)]
pub struct OperationUndoResult {
    pub operation_index: i32,
    pub operation_type: OperationType,
    pub resource_type: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Aggregate outcome of an undo run
#[derive(Debug, Clone)]
pub struct UndoResult {
    pub workflow_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-operation outcomes in execution (reverse-index) order
    pub operations: Vec<OperationUndoResult>,
}

impl UndoResult {
    pub fn is_fully_undone(&self) -> bool {
        self.failed == 0
    }
}

/// Orchestrates reversal of a failed workflow
///
/// Operations run in reverse `operation_index` order, each strategy under
/// the configured retry policy. A failed step never halts the run:
/// aborting early would leave the operations before it unreversed, and
/// best-effort maximises recovered state.
pub struct UndoEngine {
    strategies: Arc<UndoStrategyRegistry>,
    retry_policy: RetryPolicy,
}

impl UndoEngine {
    pub fn new(strategies: Arc<UndoStrategyRegistry>) -> Self {
        Self {
            strategies,
            retry_policy: RetryPolicy::retry_transient(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Reverse the given operations (the full ordered list for a workflow)
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn undo_workflow(
        &self,
        workflow_id: &str,
        mut operations: Vec<Operation>,
    ) -> UndoResult {
        operations.sort_by_key(|op| op.operation_index);

        let total = operations.len();
        let mut results = Vec::with_capacity(total);

        for operation in operations.iter().rev() {
            let outcome = self.undo_one(operation).await;
            if !outcome.succeeded {
                warn!(
                    workflow_id,
                    operation_index = operation.operation_index,
                    error = outcome.error.as_deref().unwrap_or("strategy reported failure"),
                    "undo step failed, continuing with remaining operations"
                );
            }
            results.push(outcome);
        }

        let succeeded = results.iter().filter(|r| r.succeeded).count();
        let failed = total - succeeded;

        info!(workflow_id, total, succeeded, failed, "undo run finished");

        UndoResult {
            workflow_id: workflow_id.to_string(),
            total,
            succeeded,
            failed,
            operations: results,
        }
    }

    async fn undo_one(&self, operation: &Operation) -> OperationUndoResult {
        let base = OperationUndoResult {
            operation_index: operation.operation_index,
            operation_type: operation.operation_type.clone(),
            resource_type: operation.resource_type.clone(),
            succeeded: false,
            error: None,
        };

        let Some(strategy) = self.strategies.find_strategy(operation) else {
            return OperationUndoResult {
                error: Some(format!(
                    "no undo strategy for {} on {}",
                    operation.operation_type, operation.resource_type
                )),
                ..base
            };
        };

        let succeeded = self
            .retry_policy
            .execute(|| strategy.undo(operation))
            .await;

        OperationUndoResult {
            succeeded,
            error: if succeeded {
                None
            } else {
                Some(format!("strategy '{}' did not succeed", strategy.name()))
            },
            ..base
        }
    }
}

//! Failed-workflow scanning and recovery

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use katalyst_core::WorkflowRecord;
use katalyst_storage::{OperationLogStore, WorkflowStateStore};

use crate::undo::UndoEngine;

/// Error-message fragments treated as transient (case-insensitive)
const TRANSIENT_ERROR_MARKERS: &[&str] =
    &["timeout", "connection", "temporarily unavailable", "try again"];

/// Recovery tuning knobs
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Workflows processed per batch
    pub batch_size: usize,

    /// Pause between workflows, to avoid overwhelming downstream
    pub inter_step_delay: Duration,

    /// Recovery attempts per workflow before demanding manual intervention
    pub max_retries_per_workflow: u32,

    /// How often the scheduler scans
    pub scan_interval: Duration,

    /// Consecutive erroring scans before the scheduler stops itself
    pub max_consecutive_errors: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_step_delay: Duration::from_millis(100),
            max_retries_per_workflow: 3,
            scan_interval: Duration::from_secs(30),
            max_consecutive_errors: 5,
        }
    }
}

impl RecoveryConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_inter_step_delay(mut self, delay: Duration) -> Self {
        self.inter_step_delay = delay;
        self
    }

    pub fn with_max_retries_per_workflow(mut self, max: u32) -> Self {
        self.max_retries_per_workflow = max;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }
}

/// How a failed workflow should be recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// The failure point is known; resume the workflow from there
    ResumeFromCheckpoint,

    /// The error looks transient; reverse the partial work so the caller
    /// can safely retry
    Retry,

    /// Nothing automatic applies; a human has to look
    ManualIntervention,
}

/// Bridge to the workflow composer for checkpoint resumption
///
/// Applications register one to make RESUME_FROM_CHECKPOINT actionable;
/// without it, resume attempts are recorded failures.
#[async_trait]
pub trait WorkflowResumer: Send + Sync {
    async fn resume(&self, workflow: &WorkflowRecord) -> anyhow::Result<()>;
}

/// Cumulative recovery counters, shared with the health monitor
#[derive(Debug, Default)]
pub struct RecoveryMetrics {
    pub total_scans: AtomicU64,
    pub total_failed_workflows_found: AtomicU64,
    pub total_successful_recoveries: AtomicU64,
    pub total_failed_recoveries: AtomicU64,
}

impl RecoveryMetrics {
    /// successes / (successes + failures) × 100; 100 when nothing ran yet
    pub fn success_rate(&self) -> f64 {
        let successes = self.total_successful_recoveries.load(Ordering::SeqCst);
        let failures = self.total_failed_recoveries.load(Ordering::SeqCst);
        let attempts = successes + failures;
        if attempts == 0 {
            100.0
        } else {
            successes as f64 / attempts as f64 * 100.0
        }
    }
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryMetricsSnapshot {
    pub total_scans: u64,
    pub total_failed_workflows_found: u64,
    pub total_successful_recoveries: u64,
    pub total_failed_recoveries: u64,
    pub success_rate: f64,
    pub workflows_in_retry: usize,
}

/// One workflow's outcome within a scan
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub workflow_id: String,
    pub strategy: RecoveryStrategy,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Aggregate result of one `scan_and_recover` call
#[derive(Debug)]
pub struct RecoveryScanResult {
    pub scan_number: u64,
    pub failed_found: usize,
    pub recovered: usize,
    pub failed: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
    /// Per-workflow detail, including manual-intervention classifications
    pub attempts: Vec<RecoveryAttempt>,
}

/// Scans for failed workflows and drives their recovery
pub struct RecoveryJob {
    workflow_store: Arc<dyn WorkflowStateStore>,
    operation_log: Arc<dyn OperationLogStore>,
    undo_engine: Arc<UndoEngine>,
    resumer: Option<Arc<dyn WorkflowResumer>>,
    retry_counts: DashMap<String, u32>,
    metrics: Arc<RecoveryMetrics>,
    config: RecoveryConfig,
}

impl RecoveryJob {
    pub fn new(
        workflow_store: Arc<dyn WorkflowStateStore>,
        operation_log: Arc<dyn OperationLogStore>,
        undo_engine: Arc<UndoEngine>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            workflow_store,
            operation_log,
            undo_engine,
            resumer: None,
            retry_counts: DashMap::new(),
            metrics: Arc::new(RecoveryMetrics::default()),
            config,
        }
    }

    /// Register the resume bridge
    pub fn with_resumer(mut self, resumer: Arc<dyn WorkflowResumer>) -> Self {
        self.resumer = Some(resumer);
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RecoveryMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of workflows with outstanding retry budget spent
    pub fn workflows_in_retry(&self) -> usize {
        self.retry_counts.len()
    }

    pub fn metrics_snapshot(&self) -> RecoveryMetricsSnapshot {
        RecoveryMetricsSnapshot {
            total_scans: self.metrics.total_scans.load(Ordering::SeqCst),
            total_failed_workflows_found: self
                .metrics
                .total_failed_workflows_found
                .load(Ordering::SeqCst),
            total_successful_recoveries: self
                .metrics
                .total_successful_recoveries
                .load(Ordering::SeqCst),
            total_failed_recoveries: self.metrics.total_failed_recoveries.load(Ordering::SeqCst),
            success_rate: self.metrics.success_rate(),
            workflows_in_retry: self.workflows_in_retry(),
        }
    }

    /// Whether an error message matches the transient markers
    pub fn is_transient_error(message: &str) -> bool {
        let lowered = message.to_lowercase();
        TRANSIENT_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    /// Strategy selection for one failed workflow
    pub fn classify(record: &WorkflowRecord) -> RecoveryStrategy {
        if record.failed_at_operation.map_or(false, |index| index > 0) {
            return RecoveryStrategy::ResumeFromCheckpoint;
        }
        if record
            .error_message
            .as_deref()
            .map_or(false, Self::is_transient_error)
        {
            return RecoveryStrategy::Retry;
        }
        RecoveryStrategy::ManualIntervention
    }

    /// One full scan over the failed workflows
    #[instrument(skip(self))]
    pub async fn scan_and_recover(&self) -> RecoveryScanResult {
        let started = Instant::now();
        let scan_number = self.metrics.total_scans.fetch_add(1, Ordering::SeqCst) + 1;

        // Read errors yield an empty scan, not a crash
        let failed_workflows = match self.workflow_store.get_failed_workflows().await {
            Ok(workflows) => workflows,
            Err(err) => {
                warn!("failed-workflow scan query failed: {err}");
                Vec::new()
            }
        };

        let failed_found = failed_workflows.len();
        self.metrics
            .total_failed_workflows_found
            .fetch_add(failed_found as u64, Ordering::SeqCst);

        let mut recovered = 0usize;
        let mut failed = 0usize;
        let mut errors = Vec::new();
        let mut attempts = Vec::new();

        for batch in failed_workflows.chunks(self.config.batch_size) {
            debug!(batch_size = batch.len(), scan_number, "processing recovery batch");

            for (index, workflow) in batch.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(self.config.inter_step_delay).await;
                }

                let attempt = self.recover_one(workflow).await;
                match (&attempt.strategy, attempt.succeeded) {
                    (RecoveryStrategy::ManualIntervention, _) => {}
                    (_, true) => {
                        self.retry_counts.remove(&attempt.workflow_id);
                        self.metrics
                            .total_successful_recoveries
                            .fetch_add(1, Ordering::SeqCst);
                        recovered += 1;
                    }
                    (_, false) => {
                        *self
                            .retry_counts
                            .entry(attempt.workflow_id.clone())
                            .or_insert(0) += 1;
                        self.metrics
                            .total_failed_recoveries
                            .fetch_add(1, Ordering::SeqCst);
                        failed += 1;
                        if let Some(error) = &attempt.error {
                            errors.push(format!("{}: {error}", attempt.workflow_id));
                        }
                    }
                }
                attempts.push(attempt);
            }
        }

        let duration = started.elapsed();
        info!(
            scan_number,
            failed_found, recovered, failed, "recovery scan finished"
        );

        RecoveryScanResult {
            scan_number,
            failed_found,
            recovered,
            failed,
            duration,
            errors,
            attempts,
        }
    }

    async fn recover_one(&self, workflow: &WorkflowRecord) -> RecoveryAttempt {
        let workflow_id = workflow.workflow_id.clone();

        let attempts_so_far = self
            .retry_counts
            .get(&workflow_id)
            .map(|entry| *entry)
            .unwrap_or(0);
        if attempts_so_far >= self.config.max_retries_per_workflow {
            warn!(
                %workflow_id,
                attempts = attempts_so_far,
                "retry budget exhausted, leaving for manual intervention"
            );
            return RecoveryAttempt {
                workflow_id,
                strategy: RecoveryStrategy::ManualIntervention,
                succeeded: false,
                error: Some(format!(
                    "retry budget exhausted after {attempts_so_far} attempts"
                )),
            };
        }

        let strategy = Self::classify(workflow);
        debug!(%workflow_id, ?strategy, "recovering workflow");

        let outcome = match strategy {
            RecoveryStrategy::ManualIntervention => Err("manual intervention required".to_string()),
            RecoveryStrategy::Retry => self.retry_via_undo(workflow).await,
            RecoveryStrategy::ResumeFromCheckpoint => match &self.resumer {
                Some(resumer) => resumer
                    .resume(workflow)
                    .await
                    .map_err(|err| err.to_string()),
                None => Err("no resume handler registered".to_string()),
            },
        };

        match outcome {
            Ok(()) => RecoveryAttempt {
                workflow_id,
                strategy,
                succeeded: true,
                error: None,
            },
            Err(error) => RecoveryAttempt {
                workflow_id,
                strategy,
                succeeded: false,
                error: Some(error),
            },
        }
    }

    /// Reverse the workflow's recorded operations so a caller can retry
    async fn retry_via_undo(&self, workflow: &WorkflowRecord) -> Result<(), String> {
        let operations = match self
            .operation_log
            .get_all_operations(&workflow.workflow_id)
            .await
        {
            Ok(operations) => operations,
            Err(err) => {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    "operation-log read failed during recovery: {err}"
                );
                Vec::new()
            }
        };

        let result = self
            .undo_engine
            .undo_workflow(&workflow.workflow_id, operations)
            .await;

        if result.is_fully_undone() {
            if let Err(err) = self
                .workflow_store
                .mark_as_undone(&workflow.workflow_id)
                .await
            {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    "failed to mark workflow undone: {err}"
                );
            }
            Ok(())
        } else {
            let message = format!(
                "undo incomplete: {} of {} operations failed",
                result.failed, result.total
            );
            if let Err(err) = self
                .workflow_store
                .mark_undo_failed(&workflow.workflow_id, &message)
                .await
            {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    "failed to record undo failure: {err}"
                );
            }
            Err(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use katalyst_core::WorkflowStatus;

    fn record(
        id: &str,
        failed_at: Option<i32>,
        error: Option<&str>,
    ) -> WorkflowRecord {
        WorkflowRecord {
            workflow_id: id.to_string(),
            workflow_name: "test".to_string(),
            status: WorkflowStatus::Failed,
            total_operations: failed_at.map(|i| i + 1).unwrap_or(0),
            failed_at_operation: failed_at,
            error_message: error.map(String::from),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_transient_error_markers() {
        assert!(RecoveryJob::is_transient_error("Connection reset by peer"));
        assert!(RecoveryJob::is_transient_error("read TIMEOUT after 5s"));
        assert!(RecoveryJob::is_transient_error(
            "service temporarily unavailable"
        ));
        assert!(RecoveryJob::is_transient_error("please try again later"));

        assert!(!RecoveryJob::is_transient_error("validation error"));
        assert!(!RecoveryJob::is_transient_error("duplicate key"));
    }

    #[test]
    fn test_classification() {
        // Known failure point past the first operation -> resume
        assert_eq!(
            RecoveryJob::classify(&record("w1", Some(2), None)),
            RecoveryStrategy::ResumeFromCheckpoint
        );

        // Index 0 is not resumable; falls through to the error heuristics
        assert_eq!(
            RecoveryJob::classify(&record("w2", Some(0), Some("connection reset"))),
            RecoveryStrategy::Retry
        );

        assert_eq!(
            RecoveryJob::classify(&record("w3", None, Some("connection reset"))),
            RecoveryStrategy::Retry
        );

        assert_eq!(
            RecoveryJob::classify(&record("w4", None, Some("validation error"))),
            RecoveryStrategy::ManualIntervention
        );

        assert_eq!(
            RecoveryJob::classify(&record("w5", None, None)),
            RecoveryStrategy::ManualIntervention
        );
    }

    #[test]
    fn test_success_rate() {
        let metrics = RecoveryMetrics::default();
        assert_eq!(metrics.success_rate(), 100.0);

        metrics
            .total_successful_recoveries
            .store(3, Ordering::SeqCst);
        metrics.total_failed_recoveries.store(1, Ordering::SeqCst);
        assert_eq!(metrics.success_rate(), 75.0);
    }

    #[test]
    fn test_config_builder() {
        let config = RecoveryConfig::default()
            .with_batch_size(0)
            .with_inter_step_delay(Duration::from_millis(5))
            .with_max_retries_per_workflow(1)
            .with_max_consecutive_errors(0);

        assert_eq!(config.batch_size, 1);
        assert_eq!(config.inter_step_delay, Duration::from_millis(5));
        assert_eq!(config.max_retries_per_workflow, 1);
        assert_eq!(config.max_consecutive_errors, 1);
    }
}

//! Recovery scan scheduler
//!
//! One long-running loop calling `scan_and_recover` on an interval. Scans
//! that record errors count toward a consecutive-error ceiling; when the
//! ceiling is reached the loop stops itself and has to be re-started. A
//! stop request is honored before the next sleep resumes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::job::{RecoveryJob, RecoveryScanResult};

/// Drives the periodic recovery loop
pub struct RecoveryScheduler {
    job: Arc<RecoveryJob>,
    running: AtomicBool,
    consecutive_errors: Arc<AtomicU32>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryScheduler {
    pub fn new(job: Arc<RecoveryJob>) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            consecutive_errors: Arc::new(AtomicU32::new(0)),
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn job(&self) -> &RecoveryJob {
        &self.job
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn max_consecutive_errors(&self) -> u32 {
        self.job.config().max_consecutive_errors
    }

    /// Start the loop; a no-op when already running
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("recovery scheduler already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let scheduler = Arc::clone(self);
        let interval = self.job.config().scan_interval;
        let ceiling = self.job.config().max_consecutive_errors;

        info!(?interval, "starting recovery scheduler");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = scheduler.job.scan_and_recover().await;

                        if result.errors.is_empty() {
                            scheduler.consecutive_errors.store(0, Ordering::SeqCst);
                        } else {
                            let errors = scheduler
                                .consecutive_errors
                                .fetch_add(1, Ordering::SeqCst)
                                + 1;
                            warn!(
                                consecutive_errors = errors,
                                scan_errors = result.errors.len(),
                                "recovery scan recorded errors"
                            );
                            if errors >= ceiling {
                                error!(
                                    consecutive_errors = errors,
                                    "consecutive-error ceiling reached, stopping scheduler"
                                );
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("recovery scheduler: shutdown requested");
                        break;
                    }
                }
            }

            scheduler.running.store(false, Ordering::SeqCst);
            debug!("recovery loop exited");
        });

        *self.handle.lock() = Some(handle);
    }

    /// Stop the loop gracefully and reset the consecutive-error counter
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("recovery loop join failed: {err}");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.consecutive_errors.store(0, Ordering::SeqCst);
        info!("recovery scheduler stopped");
    }

    /// Run one scan synchronously without disturbing the loop
    pub async fn manual_scan(&self) -> RecoveryScanResult {
        self.job.scan_and_recover().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use katalyst_storage::{
        InMemoryOperationLog, InMemoryWorkflowStateStore, OperationLogStore, WorkflowStateStore,
    };

    use crate::recovery::RecoveryConfig;
    use crate::undo::{RetryPolicy, UndoEngine, UndoStrategyRegistry};

    fn scheduler_with_interval(interval: Duration) -> Arc<RecoveryScheduler> {
        let workflows = Arc::new(InMemoryWorkflowStateStore::new());
        let log = Arc::new(InMemoryOperationLog::new());
        let engine = Arc::new(
            UndoEngine::new(Arc::new(UndoStrategyRegistry::new()))
                .with_retry_policy(RetryPolicy::retry_all().with_max_retries(0)),
        );
        let job = RecoveryJob::new(
            workflows as Arc<dyn WorkflowStateStore>,
            log as Arc<dyn OperationLogStore>,
            engine,
            RecoveryConfig::default().with_scan_interval(interval),
        );
        Arc::new(RecoveryScheduler::new(Arc::new(job)))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let scheduler = scheduler_with_interval(Duration::from_millis(10));

        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_loop_scans_periodically() {
        let scheduler = scheduler_with_interval(Duration::from_millis(5));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.stop().await;

        let snapshot = scheduler.job().metrics_snapshot();
        assert!(snapshot.total_scans >= 2);
    }

    #[tokio::test]
    async fn test_stop_resets_error_counter() {
        let scheduler = scheduler_with_interval(Duration::from_millis(1000));
        scheduler.start();
        scheduler.consecutive_errors.store(3, Ordering::SeqCst);

        scheduler.stop().await;

        assert_eq!(scheduler.consecutive_errors(), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_manual_scan_runs_without_loop() {
        let scheduler = scheduler_with_interval(Duration::from_secs(3600));

        let result = scheduler.manual_scan().await;
        assert_eq!(result.scan_number, 1);
        assert_eq!(result.failed_found, 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let scheduler = scheduler_with_interval(Duration::from_millis(5));

        scheduler.start();
        scheduler.stop().await;
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop().await;
    }
}

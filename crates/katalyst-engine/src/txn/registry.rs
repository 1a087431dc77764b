//! Ordered, prioritized adapter registry with per-phase execution policy

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::adapter::{AdapterError, TransactionAdapter};
use super::context::TransactionContext;
use super::phase::TransactionPhase;

/// How a phase reacts to adapter failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Stop at the first critical failure; non-critical failures are
    /// recorded and iteration continues
    FailFast,

    /// Visit every adapter and never re-raise
    BestEffort,
}

/// Outcome of one adapter invocation within a phase
#[derive(Debug)]
pub struct AdapterPhaseResult {
    pub adapter: String,
    pub phase: TransactionPhase,
    pub success: bool,
    pub critical: bool,
    pub error: Option<AdapterError>,
    pub duration: Duration,
}

/// Aggregated outcomes of one phase across all adapters
#[derive(Debug)]
pub struct PhaseExecutionResults {
    pub phase: TransactionPhase,
    pub results: Vec<AdapterPhaseResult>,
}

impl PhaseExecutionResults {
    fn empty(phase: TransactionPhase) -> Self {
        Self {
            phase,
            results: Vec::new(),
        }
    }

    pub fn has_critical_failures(&self) -> bool {
        self.results.iter().any(|r| !r.success && r.critical)
    }

    pub fn critical_failures(&self) -> Vec<&AdapterPhaseResult> {
        self.results
            .iter()
            .filter(|r| !r.success && r.critical)
            .collect()
    }

    pub fn non_critical_failures(&self) -> Vec<&AdapterPhaseResult> {
        self.results
            .iter()
            .filter(|r| !r.success && !r.critical)
            .collect()
    }

    pub fn successes(&self) -> Vec<&AdapterPhaseResult> {
        self.results.iter().filter(|r| r.success).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }

    /// Move the first critical failure's error out for re-raising
    pub fn take_critical_failure(&mut self) -> Option<(String, AdapterError)> {
        let index = self
            .results
            .iter()
            .position(|r| !r.success && r.critical)?;
        let result = &mut self.results[index];
        let error = result.error.take()?;
        Some((result.adapter.clone(), error))
    }
}

/// Holds the ordered set of registered adapters
///
/// The vec is kept sorted by descending priority with a stable sort, so
/// adapters of equal priority keep their registration order. Registration
/// normally happens at startup; the lock makes runtime changes safe against
/// concurrent phase execution.
pub struct AdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn TransactionAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
        }
    }

    /// Register an adapter
    pub fn register(&self, adapter: Arc<dyn TransactionAdapter>) {
        let mut adapters = self.adapters.write();
        debug!(
            adapter = adapter.name(),
            priority = adapter.priority(),
            critical = adapter.is_critical(),
            "registered transaction adapter"
        );
        adapters.push(adapter);
        // Stable: equal priorities keep registration order
        adapters.sort_by_key(|a| std::cmp::Reverse(a.priority()));
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Adapter names in execution order (for diagnostics)
    pub fn execution_order(&self) -> Vec<String> {
        self.adapters
            .read()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Run one phase across the registry
    pub async fn execute_phase(
        &self,
        phase: TransactionPhase,
        ctx: &TransactionContext,
        mode: ExecutionMode,
    ) -> PhaseExecutionResults {
        let adapters: Vec<Arc<dyn TransactionAdapter>> =
            self.adapters.read().iter().cloned().collect();

        let mut results = PhaseExecutionResults::empty(phase);

        for adapter in adapters {
            let started = Instant::now();
            let outcome = adapter.on_phase(phase, ctx).await;
            let duration = started.elapsed();

            match outcome {
                Ok(()) => {
                    results.results.push(AdapterPhaseResult {
                        adapter: adapter.name().to_string(),
                        phase,
                        success: true,
                        critical: adapter.is_critical(),
                        error: None,
                        duration,
                    });
                }
                Err(err) => {
                    let critical = adapter.is_critical();
                    if critical {
                        error!(
                            adapter = adapter.name(),
                            %phase,
                            "critical adapter failure: {err}"
                        );
                    } else {
                        warn!(
                            adapter = adapter.name(),
                            %phase,
                            "non-critical adapter failure: {err}"
                        );
                    }

                    results.results.push(AdapterPhaseResult {
                        adapter: adapter.name().to_string(),
                        phase,
                        success: false,
                        critical,
                        error: Some(err),
                        duration,
                    });

                    if mode == ExecutionMode::FailFast && critical {
                        break;
                    }
                }
            }
        }

        results
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

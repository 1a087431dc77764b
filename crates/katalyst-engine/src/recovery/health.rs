//! Recovery-subsystem health evaluation

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::job::RecoveryMetricsSnapshot;
use super::scheduler::RecoveryScheduler;

/// Threshold configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Minimum acceptable recovery success rate, in percent
    pub min_success_rate_percent: f64,

    /// Maximum workflows allowed to sit in the retry map
    pub max_workflows_in_retry: usize,

    /// Maximum total failed recoveries before flagging
    pub max_failed_recoveries: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate_percent: 70.0,
            max_workflows_in_retry: 50,
            max_failed_recoveries: 100,
        }
    }
}

impl HealthThresholds {
    pub fn with_min_success_rate(mut self, percent: f64) -> Self {
        self.min_success_rate_percent = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_max_workflows_in_retry(mut self, max: usize) -> Self {
        self.max_workflows_in_retry = max;
        self
    }

    pub fn with_max_failed_recoveries(mut self, max: u64) -> Self {
        self.max_failed_recoveries = max;
        self
    }
}

/// Severity of one detected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

/// One detected problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

/// Overall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of one health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub metrics: RecoveryMetricsSnapshot,
}

/// Callback invoked once per raised issue
pub type AlertCallback = Arc<dyn Fn(&HealthIssue) + Send + Sync>;

/// Evaluates the recovery subsystem against thresholds
///
/// UNHEALTHY when any issue is CRITICAL, DEGRADED when any is WARNING,
/// HEALTHY otherwise.
pub struct HealthMonitor {
    scheduler: Arc<RecoveryScheduler>,
    thresholds: HealthThresholds,
    alert: Option<AlertCallback>,
}

impl HealthMonitor {
    pub fn new(scheduler: Arc<RecoveryScheduler>) -> Self {
        Self {
            scheduler,
            thresholds: HealthThresholds::default(),
            alert: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Invoke the callback for every issue a check raises
    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.alert = Some(callback);
        self
    }

    #[instrument(skip(self))]
    pub fn perform_health_check(&self) -> HealthCheckResult {
        let metrics = self.scheduler.job().metrics_snapshot();
        let mut issues = Vec::new();

        if !self.scheduler.is_running() {
            issues.push(HealthIssue {
                severity: IssueSeverity::Critical,
                message: "recovery scheduler is not running".to_string(),
            });
        }

        let consecutive = self.scheduler.consecutive_errors();
        let ceiling = self.scheduler.max_consecutive_errors();
        if consecutive >= ceiling {
            issues.push(HealthIssue {
                severity: IssueSeverity::Critical,
                message: format!(
                    "consecutive scan errors at the ceiling ({consecutive}/{ceiling})"
                ),
            });
        } else if consecutive > 0 {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!("recovery scans erroring ({consecutive}/{ceiling})"),
            });
        }

        if metrics.success_rate < self.thresholds.min_success_rate_percent {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!(
                    "recovery success rate {:.1}% below threshold {:.1}%",
                    metrics.success_rate, self.thresholds.min_success_rate_percent
                ),
            });
        }

        if metrics.workflows_in_retry > self.thresholds.max_workflows_in_retry {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!(
                    "{} workflows in retry (limit {})",
                    metrics.workflows_in_retry, self.thresholds.max_workflows_in_retry
                ),
            });
        }

        if metrics.total_failed_recoveries > self.thresholds.max_failed_recoveries {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!(
                    "{} failed recoveries total (limit {})",
                    metrics.total_failed_recoveries, self.thresholds.max_failed_recoveries
                ),
            });
        }

        let status = if issues
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Critical)
        {
            HealthStatus::Unhealthy
        } else if !issues.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        for issue in &issues {
            match issue.severity {
                IssueSeverity::Critical => warn!(message = %issue.message, "health alert"),
                IssueSeverity::Warning => info!(message = %issue.message, "health warning"),
            }
            if let Some(alert) = &self.alert {
                alert(issue);
            }
        }

        HealthCheckResult {
            status,
            issues,
            metrics,
        }
    }
}

//! Retry policy for undo strategies
//!
//! Exponential backoff with jitter to avoid thundering herd when many
//! workflows are being reversed at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::strategy::UndoError;

/// Which errors are worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Retry every error
    All,

    /// Retry only socket/timeout/IO-style errors
    TransientOnly,
}

impl RetryScope {
    fn is_retryable(self, error: &UndoError) -> bool {
        match self {
            Self::All => true,
            Self::TransientOnly => error.is_transient(),
        }
    }
}

/// Retry configuration for undo actions
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use katalyst_engine::undo::RetryPolicy;
///
/// let policy = RetryPolicy::retry_transient()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap on the delay between retries
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,

    /// Which errors qualify for a retry
    pub scope: RetryScope,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::retry_all()
    }
}

impl RetryPolicy {
    /// Retry every error: 3 retries, 100 ms initial, x2.0, 5 s cap
    pub fn retry_all() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            scope: RetryScope::All,
        }
    }

    /// Retry only transient (socket/timeout/IO-style) errors
    pub fn retry_transient() -> Self {
        Self {
            scope: RetryScope::TransientOnly,
            ..Self::retry_all()
        }
    }

    /// 5 retries, 50 ms initial, x2.0, 10 s cap
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            scope: RetryScope::All,
        }
    }

    /// 1 retry, 500 ms initial, x1.5, 1 s cap
    pub fn conservative() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            scope: RetryScope::All,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_scope(mut self, scope: RetryScope) -> Self {
        self.scope = scope;
        self
    }

    /// Apply up to ±20% jitter to a base delay
    fn jittered(delay: Duration) -> Duration {
        let base = delay.as_secs_f64();
        if base <= 0.0 {
            return Duration::ZERO;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.2..0.2);
        Duration::from_secs_f64((base * factor).max(0.0))
    }

    /// Run an action until it reports success or the policy is exhausted
    ///
    /// The action returns `Ok(true)` on success, `Ok(false)` for a reported
    /// failure worth retrying, and `Err` for an exceptional failure - which
    /// ends the run immediately when the scope rejects it.
    pub async fn execute<F, Fut>(&self, mut action: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, UndoError>>,
    {
        let mut delay = self.initial_delay;

        for attempt in 0..=self.max_retries {
            match action().await {
                Ok(true) => return true,
                Ok(false) => {
                    debug!(attempt, "undo action reported failure");
                }
                Err(err) => {
                    if !self.scope.is_retryable(&err) {
                        warn!(attempt, "non-retryable undo error: {err}");
                        return false;
                    }
                    warn!(attempt, "retryable undo error: {err}");
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(Self::jittered(delay)).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * self.backoff_multiplier)
                        .min(self.max_delay.as_secs_f64()),
                );
            }
        }

        false
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_presets() {
        let aggressive = RetryPolicy::aggressive();
        assert_eq!(aggressive.max_retries, 5);
        assert_eq!(aggressive.initial_delay, Duration::from_millis(50));
        assert_eq!(aggressive.max_delay, Duration::from_secs(10));
        assert_eq!(aggressive.backoff_multiplier, 2.0);

        let conservative = RetryPolicy::conservative();
        assert_eq!(conservative.max_retries, 1);
        assert_eq!(conservative.initial_delay, Duration::from_millis(500));
        assert_eq!(conservative.max_delay, Duration::from_secs(1));
        assert_eq!(conservative.backoff_multiplier, 1.5);

        assert_eq!(RetryPolicy::retry_all().scope, RetryScope::All);
        assert_eq!(
            RetryPolicy::retry_transient().scope,
            RetryScope::TransientOnly
        );
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let ok = RetryPolicy::retry_all()
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_reported_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let policy = RetryPolicy::retry_all()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_retries(3);

        let ok = policy
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Ok(n >= 2)
                }
            })
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let policy = RetryPolicy::retry_transient()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_retries(5);

        let ok = policy
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(UndoError::DataAccess("row is gone".to_string()))
                }
            })
            .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let policy = RetryPolicy::retry_transient()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_retries(2);

        let ok = policy
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(UndoError::Timeout("deadline exceeded".to_string()))
                }
            })
            .await;

        // Exhausted: initial attempt + 2 retries
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = RetryPolicy::jittered(base);
            assert!(jittered >= Duration::from_millis(80));
            assert!(jittered <= Duration::from_millis(120));
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let policy = RetryPolicy::aggressive().with_scope(RetryScope::TransientOnly);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}

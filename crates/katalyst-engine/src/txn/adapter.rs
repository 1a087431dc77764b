//! Transaction adapter contract

use async_trait::async_trait;

use super::context::TransactionContext;
use super::phase::TransactionPhase;
use crate::events::EventValidationFailed;

/// Error raised by an adapter's phase handler
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// One or more pending events failed pre-commit validation
    #[error(transparent)]
    Validation(#[from] EventValidationFailed),

    /// Adapter-reported failure with a message
    #[error("{0}")]
    Failed(String),

    /// Any other failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A cross-cutting participant notified at every phase of a transaction
///
/// Adapters are registered programmatically at startup. Within a phase they
/// run in descending `priority`, ties broken by registration order. A
/// *critical* adapter's failure forces rollback when the phase runs in
/// fail-fast mode; non-critical failures are logged and carried in the
/// phase results.
///
/// Adapters must not spawn work that outlives the transaction unless they
/// explicitly accept running outside it (typically only AFTER_COMMIT
/// adapters do).
#[async_trait]
pub trait TransactionAdapter: Send + Sync {
    /// Adapter name used in logs and phase results
    fn name(&self) -> &str;

    /// Higher priorities run first within a phase
    fn priority(&self) -> i32 {
        0
    }

    /// Whether a failure of this adapter forces rollback
    fn is_critical(&self) -> bool {
        false
    }

    /// Phase notification
    async fn on_phase(
        &self,
        phase: TransactionPhase,
        ctx: &TransactionContext,
    ) -> Result<(), AdapterError>;
}

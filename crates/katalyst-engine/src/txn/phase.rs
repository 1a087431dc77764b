//! Transaction lifecycle phases

use serde::{Deserialize, Serialize};

/// Points in the transaction lifecycle at which adapters run
///
/// Ordered along a successful path:
/// BEFORE_BEGIN → AFTER_BEGIN → BEFORE_COMMIT_VALIDATION → BEFORE_COMMIT
/// → AFTER_COMMIT. On the failure path everything after the first failing
/// phase is replaced by ON_ROLLBACK → AFTER_ROLLBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPhase {
    /// Before the database transaction is opened
    BeforeBegin,

    /// Right after the database transaction is opened
    AfterBegin,

    /// Pre-commit validation point; critical failures here force rollback
    BeforeCommitValidation,

    /// Last phase inside the database transaction
    BeforeCommit,

    /// After the database commit; failures can no longer un-commit
    AfterCommit,

    /// The database transaction is being rolled back
    OnRollback,

    /// After the rollback completed
    AfterRollback,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeBegin => "BEFORE_BEGIN",
            Self::AfterBegin => "AFTER_BEGIN",
            Self::BeforeCommitValidation => "BEFORE_COMMIT_VALIDATION",
            Self::BeforeCommit => "BEFORE_COMMIT",
            Self::AfterCommit => "AFTER_COMMIT",
            Self::OnRollback => "ON_ROLLBACK",
            Self::AfterRollback => "AFTER_ROLLBACK",
        }
    }

    /// True for the two phases that only run on the failure path
    pub fn is_rollback_phase(&self) -> bool {
        matches!(self, Self::OnRollback | Self::AfterRollback)
    }
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            TransactionPhase::BeforeCommitValidation.to_string(),
            "BEFORE_COMMIT_VALIDATION"
        );
        assert_eq!(TransactionPhase::OnRollback.to_string(), "ON_ROLLBACK");
    }

    #[test]
    fn test_rollback_phases() {
        assert!(TransactionPhase::OnRollback.is_rollback_phase());
        assert!(TransactionPhase::AfterRollback.is_rollback_phase());
        assert!(!TransactionPhase::BeforeCommit.is_rollback_phase());
    }
}

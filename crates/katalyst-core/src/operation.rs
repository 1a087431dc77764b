//! Operation records - the append-only log entries behind workflow undo

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of repository-level operation recorded in the log
///
/// The closed set covers the operations the built-in undo strategies know
/// how to reverse; `Custom` is the escape hatch for user-declared kinds
/// (which need a user-registered strategy to be reversible).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Row insertion (reversed by deleting the row)
    Insert,

    /// Row update (reversed by restoring the captured pre-image)
    Update,

    /// Row deletion (reversed by reinserting the captured pre-image)
    Delete,

    /// Call to an internal API (reversed via a compensation endpoint)
    ApiCall,

    /// Call to an external system (reversed via a compensation endpoint)
    ExternalCall,

    /// Outbound notification (usually irreversible; logged for audit)
    Notification,

    /// User-declared operation kind
    Custom(String),
}

impl OperationType {
    /// Wire name used in the log table and in serde
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::ApiCall => "API_CALL",
            Self::ExternalCall => "EXTERNAL_CALL",
            Self::Notification => "NOTIFICATION",
            Self::Custom(name) => name,
        }
    }

    /// Parse a wire name back into an operation type
    ///
    /// Unknown names become `Custom` - the log must round-trip user-declared
    /// kinds without loss.
    pub fn parse(value: &str) -> Self {
        match value {
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "API_CALL" => Self::ApiCall,
            "EXTERNAL_CALL" => Self::ExternalCall,
            "NOTIFICATION" => Self::Notification,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Lifecycle status of a logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Logged but the enclosing transaction has not resolved yet
    Pending,

    /// The enclosing transaction committed
    Committed,

    /// The operation has been reversed
    Undone,

    /// The enclosing transaction failed at or after this operation
    Failed,
}

impl OperationStatus {
    /// Legal status transitions:
    /// PENDING -> {COMMITTED, FAILED}; COMMITTED -> UNDONE; FAILED -> UNDONE
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Committed)
                | (Self::Pending, Self::Failed)
                | (Self::Committed, Self::Undone)
                | (Self::Failed, Self::Undone)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Committed => "COMMITTED",
            Self::Undone => "UNDONE",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a wire name; unknown values are rejected
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "COMMITTED" => Some(Self::Committed),
            "UNDONE" => Some(Self::Undone),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully materialized row of the operation log
///
/// `(workflow_id, operation_index)` is unique; `operation_index` values for
/// a workflow form a prefix of the natural numbers starting at 0 and are
/// the sole ordering key within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Workflow this operation belongs to
    pub workflow_id: String,

    /// 0-based position within the workflow
    pub operation_index: i32,

    /// Kind of operation
    pub operation_type: OperationType,

    /// Entity kind the operation touched (free-form)
    pub resource_type: String,

    /// Identifier of the touched entity, when known
    pub resource_id: Option<String>,

    /// Opaque description of the forward change
    pub operation_data: Option<serde_json::Value>,

    /// Opaque bag containing everything needed to reverse the change
    pub undo_data: Option<serde_json::Value>,

    /// Current lifecycle status
    pub status: OperationStatus,

    /// Last recorded error, if any
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub undone_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// What a tracked repository emits: an operation before it has a status or
/// timestamps. The log store stamps `created_at` and status PENDING.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub workflow_id: String,
    pub operation_index: i32,
    pub operation_type: OperationType,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub operation_data: Option<serde_json::Value>,
    pub undo_data: Option<serde_json::Value>,
}

impl NewOperation {
    pub fn new(
        workflow_id: impl Into<String>,
        operation_index: i32,
        operation_type: OperationType,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            operation_index,
            operation_type,
            resource_type: resource_type.into(),
            resource_id: None,
            operation_data: None,
            undo_data: None,
        }
    }

    /// Set the resource id
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Attach the forward-change description
    pub fn with_operation_data(mut self, data: serde_json::Value) -> Self {
        self.operation_data = Some(data);
        self
    }

    /// Attach the reversal bag
    pub fn with_undo_data(mut self, data: serde_json::Value) -> Self {
        self.undo_data = Some(data);
        self
    }

    /// Materialize a PENDING log row stamped with the current time
    pub fn into_pending(self, now: DateTime<Utc>) -> Operation {
        Operation {
            workflow_id: self.workflow_id,
            operation_index: self.operation_index,
            operation_type: self.operation_type,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            operation_data: self.operation_data,
            undo_data: self.undo_data,
            status: OperationStatus::Pending,
            error_message: None,
            created_at: now,
            committed_at: None,
            undone_at: None,
            last_error_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_roundtrip() {
        for ty in [
            OperationType::Insert,
            OperationType::Update,
            OperationType::Delete,
            OperationType::ApiCall,
            OperationType::ExternalCall,
            OperationType::Notification,
        ] {
            assert_eq!(OperationType::parse(ty.as_str()), ty);
        }

        let custom = OperationType::parse("LEDGER_POST");
        assert_eq!(custom, OperationType::Custom("LEDGER_POST".to_string()));
        assert_eq!(custom.as_str(), "LEDGER_POST");
    }

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;

        assert!(Pending.can_transition_to(Committed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Committed.can_transition_to(Undone));
        assert!(Failed.can_transition_to(Undone));

        assert!(!Pending.can_transition_to(Undone));
        assert!(!Committed.can_transition_to(Failed));
        assert!(!Undone.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Committed));
    }

    #[test]
    fn test_new_operation_into_pending() {
        let now = Utc::now();
        let op = NewOperation::new("wf-1", 0, OperationType::Insert, "User")
            .with_resource_id("user-42")
            .with_undo_data(serde_json::json!({ "id": "user-42" }))
            .into_pending(now);

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.created_at, now);
        assert_eq!(op.resource_id.as_deref(), Some("user-42"));
        assert!(op.committed_at.is_none());
        assert!(op.error_message.is_none());
    }

    #[test]
    fn test_operation_type_serde_as_string() {
        let json = serde_json::to_string(&OperationType::ApiCall).unwrap();
        assert_eq!(json, "\"API_CALL\"");

        let parsed: OperationType = serde_json::from_str("\"SAGA_STEP\"").unwrap();
        assert_eq!(parsed, OperationType::Custom("SAGA_STEP".to_string()));
    }
}

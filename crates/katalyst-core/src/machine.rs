//! In-memory workflow lifecycle machine
//!
//! Tracks the live state of one workflow while its coordinator owns it.
//! The machine is deliberately richer than the persisted status: PAUSED and
//! UNDOING exist only in memory and have no storage row. The durable state
//! store is eventually consistent with this machine, not in lockstep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Created,
    Running,
    Paused,
    Committed,
    Failed,
    Undoing,
    Undone,
    FailedUndo,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Undone | Self::FailedUndo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Committed => "COMMITTED",
            Self::Failed => "FAILED",
            Self::Undoing => "UNDOING",
            Self::Undone => "UNDONE",
            Self::FailedUndo => "FAILED_UNDO",
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowTransition {
    BeginExecution,
    Pause,
    Resume,
    Commit,
    Fail,
    Retry,
    BeginUndo,
    UndoComplete,
    UndoFail,
}

/// One history entry; never mutated after being appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State the machine entered
    pub state: MachineState,

    pub at: DateTime<Utc>,

    /// Transition that produced this state; `None` for the initial CREATED entry
    pub transition: Option<WorkflowTransition>,

    pub reason: Option<String>,
}

/// Lifecycle machine for a single workflow
///
/// Not internally locked: a workflow is owned by exactly one coordinator at
/// a time, so synchronization is the caller's concern.
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    workflow_id: String,
    state: MachineState,
    history: Vec<TransitionRecord>,
}

impl WorkflowMachine {
    /// Create a machine in CREATED, recording the initial history entry
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            workflow_id,
            state: MachineState::Created,
            history: vec![TransitionRecord {
                state: MachineState::Created,
                at: Utc::now(),
                transition: None,
                reason: None,
            }],
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// History in order of occurrence
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// The legal-transition table. Everything not listed is rejected.
    fn next_state(state: MachineState, transition: WorkflowTransition) -> Option<MachineState> {
        use MachineState as S;
        use WorkflowTransition as T;

        match (state, transition) {
            (S::Created, T::BeginExecution) => Some(S::Running),
            (S::Running, T::Pause) => Some(S::Paused),
            (S::Paused, T::Resume) => Some(S::Running),
            (S::Running, T::Commit) => Some(S::Committed),
            (S::Running, T::Fail) => Some(S::Failed),
            (S::Failed, T::Retry) => Some(S::Running),
            (S::Failed, T::BeginUndo) => Some(S::Undoing),
            (S::Undoing, T::UndoComplete) => Some(S::Undone),
            (S::Undoing, T::UndoFail) => Some(S::FailedUndo),
            _ => None,
        }
    }

    /// Apply a transition; returns `false` without mutating state or
    /// history when the request is not in the legal table.
    pub fn transition(&mut self, transition: WorkflowTransition) -> bool {
        self.transition_with_reason(transition, None)
    }

    /// Apply a transition with a recorded reason
    pub fn transition_with_reason(
        &mut self,
        transition: WorkflowTransition,
        reason: Option<String>,
    ) -> bool {
        let Some(next) = Self::next_state(self.state, transition) else {
            return false;
        };

        self.state = next;
        self.history.push(TransitionRecord {
            state: next,
            at: Utc::now(),
            transition: Some(transition),
            reason,
        });
        true
    }

    /// Undo is only legal from FAILED
    pub fn can_undo(&self) -> bool {
        self.state == MachineState::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// One-line summary for logs and diagnostics
    pub fn describe(&self) -> String {
        format!(
            "{}: {} ({} transitions)",
            self.workflow_id,
            self.state,
            self.history.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = WorkflowMachine::new("wf-1");
        assert_eq!(machine.state(), MachineState::Created);

        assert!(machine.transition(WorkflowTransition::BeginExecution));
        assert_eq!(machine.state(), MachineState::Running);

        assert!(machine.transition(WorkflowTransition::Commit));
        assert_eq!(machine.state(), MachineState::Committed);
        assert!(machine.is_terminal());
        assert!(!machine.is_active());
    }

    #[test]
    fn test_pause_resume() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);

        assert!(machine.transition(WorkflowTransition::Pause));
        assert_eq!(machine.state(), MachineState::Paused);

        assert!(machine.transition(WorkflowTransition::Resume));
        assert_eq!(machine.state(), MachineState::Running);
    }

    #[test]
    fn test_undo_path() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);
        machine.transition(WorkflowTransition::Fail);
        assert!(machine.can_undo());

        assert!(machine.transition(WorkflowTransition::BeginUndo));
        assert_eq!(machine.state(), MachineState::Undoing);
        assert!(!machine.can_undo());

        assert!(machine.transition(WorkflowTransition::UndoComplete));
        assert_eq!(machine.state(), MachineState::Undone);
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_undo_failure() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);
        machine.transition(WorkflowTransition::Fail);
        machine.transition(WorkflowTransition::BeginUndo);

        assert!(machine.transition(WorkflowTransition::UndoFail));
        assert_eq!(machine.state(), MachineState::FailedUndo);
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_retry_from_failed() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);
        machine.transition(WorkflowTransition::Fail);

        assert!(machine.transition(WorkflowTransition::Retry));
        assert_eq!(machine.state(), MachineState::Running);
    }

    #[test]
    fn test_illegal_transitions_leave_no_trace() {
        let mut machine = WorkflowMachine::new("wf-1");
        let history_len = machine.history().len();

        // Not legal from CREATED
        assert!(!machine.transition(WorkflowTransition::Commit));
        assert!(!machine.transition(WorkflowTransition::Pause));
        assert!(!machine.transition(WorkflowTransition::BeginUndo));

        assert_eq!(machine.state(), MachineState::Created);
        assert_eq!(machine.history().len(), history_len);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);
        machine.transition(WorkflowTransition::Commit);

        for transition in [
            WorkflowTransition::BeginExecution,
            WorkflowTransition::Pause,
            WorkflowTransition::Resume,
            WorkflowTransition::Commit,
            WorkflowTransition::Fail,
            WorkflowTransition::Retry,
            WorkflowTransition::BeginUndo,
            WorkflowTransition::UndoComplete,
            WorkflowTransition::UndoFail,
        ] {
            assert!(!machine.transition(transition));
        }
        assert_eq!(machine.state(), MachineState::Committed);
    }

    #[test]
    fn test_history_records_reasons_in_order() {
        let mut machine = WorkflowMachine::new("wf-1");
        machine.transition(WorkflowTransition::BeginExecution);
        machine.transition_with_reason(
            WorkflowTransition::Fail,
            Some("connection reset".to_string()),
        );

        let history = machine.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].state, MachineState::Created);
        assert!(history[0].transition.is_none());
        assert_eq!(history[1].state, MachineState::Running);
        assert_eq!(history[2].state, MachineState::Failed);
        assert_eq!(history[2].reason.as_deref(), Some("connection reset"));
        assert!(history[1].at <= history[2].at);
    }

    #[test]
    fn test_describe() {
        let mut machine = WorkflowMachine::new("wf-42");
        machine.transition(WorkflowTransition::BeginExecution);

        assert_eq!(machine.describe(), "wf-42: RUNNING (2 transitions)");
    }
}

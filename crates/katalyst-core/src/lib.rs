//! # Katalyst Core
//!
//! Domain model and contracts shared by the Katalyst workflow framework:
//!
//! - **Operations**: the append-only record of every repository-level
//!   mutation performed inside a transaction, together with the data needed
//!   to reverse it
//! - **Workflow state**: the persisted lifecycle of a workflow (started,
//!   committed, failed, undone)
//! - **Workflow machine**: the in-memory lifecycle state machine with its
//!   legal-transition table and history
//! - **Events**: the domain-event and event-bus contracts consumed by the
//!   transactional event-publishing adapter
//!
//! This crate has no dependency on storage or the engine - it is purely
//! domain types and trait seams.

pub mod event;
pub mod machine;
pub mod operation;
pub mod state;

pub use event::{DomainEvent, EventBus, EventMetadata, GenericEvent};
pub use machine::{MachineState, TransitionRecord, WorkflowMachine, WorkflowTransition};
pub use operation::{NewOperation, Operation, OperationStatus, OperationType};
pub use state::{WorkflowRecord, WorkflowStatus};

//! Compensating undo
//!
//! Every tracked operation carries an opaque `undo_data` bag; strategies
//! registered here read it back to reverse the operation. The engine walks
//! a failed workflow's operations in LIFO order, running each strategy
//! under a retry policy, and never stops on a failed step - aborting early
//! would leave later operations unreversed.

mod engine;
mod retry;
mod strategy;

pub use engine::{OperationUndoResult, UndoEngine, UndoResult};
pub use retry::{RetryPolicy, RetryScope};
pub use strategy::{
    ApiCallUndoStrategy, CompensationClient, DeleteUndoStrategy, InsertUndoStrategy,
    ResourceStore, UndoError, UndoStrategy, UndoStrategyRegistry, UpdateUndoStrategy,
};

//! # Katalyst Storage
//!
//! Persistence layer for the Katalyst workflow framework. Three contracts:
//!
//! - [`OperationLogStore`]: durable append-only record of the operations
//!   performed inside each workflow
//! - [`WorkflowStateStore`]: durable lifecycle state per workflow
//! - [`PublishedEventStore`]: the marker table that makes event publishing
//!   idempotent across retries
//!
//! Each contract ships with an in-memory implementation (the test fixture)
//! and a PostgreSQL implementation over a shared `PgPool`. The relational
//! schema is in `migrations/0001_init.sql`; timestamps are stored as BIGINT
//! epoch milliseconds.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::{ConfigError, StorageConfig};
pub use memory::{InMemoryOperationLog, InMemoryPublishedEventStore, InMemoryWorkflowStateStore};
pub use postgres::{PostgresOperationLog, PostgresPublishedEventStore, PostgresWorkflowStateStore};
pub use store::{OperationLogStore, PublishedEventStore, StoreError, WorkflowStateStore};

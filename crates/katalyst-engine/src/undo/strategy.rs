//! Undo strategies
//!
//! A strategy answers two questions: *can I handle this operation?* and
//! *reverse it, reporting success or failure*. Strategies are tried in
//! registration order; the first one accepting an operation runs. What a
//! repository wrote into `undo_data` is exactly what its strategy reads
//! back - the bags stay opaque to everything in between.

use std::sync::Arc;

use async_trait::async_trait;

use katalyst_core::{Operation, OperationType};

/// Error raised while reversing an operation
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    /// Operation deadline exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("connection: {0}")]
    Connection(String),

    /// I/O failure
    #[error("i/o: {0}")]
    Io(String),

    /// The backing store rejected the reversal
    #[error("data access: {0}")]
    DataAccess(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl UndoError {
    /// Socket/timeout/IO-style errors are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_) | Self::Io(_))
    }
}

/// Row-level access used by the insert/update/delete strategies
///
/// The engine does not know how rows are stored; applications provide this
/// seam over their repositories or a raw connection.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Remove the row identified by `resource_id`
    async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), UndoError>;

    /// Write a captured pre-image back, inserting or overwriting as needed
    async fn restore(
        &self,
        resource_type: &str,
        resource_id: Option<&str>,
        image: &serde_json::Value,
    ) -> Result<(), UndoError>;
}

/// Compensation calls for API-style operations
#[async_trait]
pub trait CompensationClient: Send + Sync {
    async fn compensate(&self, endpoint: &str, remote_id: &str) -> Result<(), UndoError>;
}

/// Per-operation reversal logic
#[async_trait]
pub trait UndoStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this strategy accepts the operation's (type, resource_type)
    fn can_handle(&self, operation: &Operation) -> bool;

    /// Reverse the operation
    ///
    /// `Ok(false)` is a reported failure - e.g. missing `undo_data` - not
    /// an exception; `Err` is reserved for failures of the reversal itself.
    async fn undo(&self, operation: &Operation) -> Result<bool, UndoError>;
}

/// Reverses an INSERT by deleting the inserted row
pub struct InsertUndoStrategy {
    store: Arc<dyn ResourceStore>,
}

impl InsertUndoStrategy {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UndoStrategy for InsertUndoStrategy {
    fn name(&self) -> &str {
        "insert-undo"
    }

    fn can_handle(&self, operation: &Operation) -> bool {
        operation.operation_type == OperationType::Insert
    }

    async fn undo(&self, operation: &Operation) -> Result<bool, UndoError> {
        let Some(resource_id) = operation.resource_id.as_deref() else {
            return Ok(false);
        };
        self.store
            .delete(&operation.resource_type, resource_id)
            .await?;
        Ok(true)
    }
}

/// Reverses an UPDATE by writing the captured pre-image back
pub struct UpdateUndoStrategy {
    store: Arc<dyn ResourceStore>,
}

impl UpdateUndoStrategy {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UndoStrategy for UpdateUndoStrategy {
    fn name(&self) -> &str {
        "update-undo"
    }

    fn can_handle(&self, operation: &Operation) -> bool {
        operation.operation_type == OperationType::Update
    }

    async fn undo(&self, operation: &Operation) -> Result<bool, UndoError> {
        let Some(image) = operation.undo_data.as_ref() else {
            return Ok(false);
        };
        self.store
            .restore(
                &operation.resource_type,
                operation.resource_id.as_deref(),
                image,
            )
            .await?;
        Ok(true)
    }
}

/// Reverses a DELETE by reinserting the captured pre-image
pub struct DeleteUndoStrategy {
    store: Arc<dyn ResourceStore>,
}

impl DeleteUndoStrategy {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UndoStrategy for DeleteUndoStrategy {
    fn name(&self) -> &str {
        "delete-undo"
    }

    fn can_handle(&self, operation: &Operation) -> bool {
        operation.operation_type == OperationType::Delete
    }

    async fn undo(&self, operation: &Operation) -> Result<bool, UndoError> {
        let Some(image) = operation.undo_data.as_ref() else {
            return Ok(false);
        };
        self.store
            .restore(
                &operation.resource_type,
                operation.resource_id.as_deref(),
                image,
            )
            .await?;
        Ok(true)
    }
}

/// Reverses API-style operations through a compensation endpoint
///
/// Expects `undo_data` to carry string fields `endpoint` and `remote_id`.
pub struct ApiCallUndoStrategy {
    client: Arc<dyn CompensationClient>,
}

impl ApiCallUndoStrategy {
    pub fn new(client: Arc<dyn CompensationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UndoStrategy for ApiCallUndoStrategy {
    fn name(&self) -> &str {
        "api-call-undo"
    }

    fn can_handle(&self, operation: &Operation) -> bool {
        matches!(
            operation.operation_type,
            OperationType::ApiCall | OperationType::ExternalCall
        )
    }

    async fn undo(&self, operation: &Operation) -> Result<bool, UndoError> {
        let Some(undo_data) = operation.undo_data.as_ref() else {
            return Ok(false);
        };
        let (Some(endpoint), Some(remote_id)) = (
            undo_data.get("endpoint").and_then(|v| v.as_str()),
            undo_data.get("remote_id").and_then(|v| v.as_str()),
        ) else {
            return Ok(false);
        };

        self.client.compensate(endpoint, remote_id).await?;
        Ok(true)
    }
}

/// Registration-ordered set of undo strategies
///
/// The first strategy accepting an operation wins; registration order is
/// the tie-breaker, so applications can front-run the defaults with their
/// own strategies.
pub struct UndoStrategyRegistry {
    strategies: Vec<Arc<dyn UndoStrategy>>,
}

impl UndoStrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// The default set: insert, update, delete and API-call reversal
    pub fn with_defaults(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn CompensationClient>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InsertUndoStrategy::new(Arc::clone(&store))));
        registry.register(Arc::new(UpdateUndoStrategy::new(Arc::clone(&store))));
        registry.register(Arc::new(DeleteUndoStrategy::new(store)));
        registry.register(Arc::new(ApiCallUndoStrategy::new(client)));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn UndoStrategy>) {
        self.strategies.push(strategy);
    }

    /// First strategy accepting the operation, in registration order
    pub fn find_strategy(&self, operation: &Operation) -> Option<&Arc<dyn UndoStrategy>> {
        self.strategies.iter().find(|s| s.can_handle(operation))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for UndoStrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared fixtures for the integration suites
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use katalyst_core::{DomainEvent, EventBus};
use katalyst_engine::prelude::*;
use katalyst_storage::{
    InMemoryOperationLog, InMemoryPublishedEventStore, InMemoryWorkflowStateStore,
    OperationLogStore, PublishedEventStore, WorkflowStateStore,
};

/// Event bus that records published ids and can reject event types
pub struct RecordingBus {
    pub published: Mutex<Vec<String>>,
    pub rejected_types: Mutex<Vec<String>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            rejected_types: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_type(&self, event_type: &str) {
        self.rejected_types.lock().push(event_type.to_string());
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, event: &dyn DomainEvent) -> anyhow::Result<()> {
        self.published.lock().push(event.event_id().to_string());
        Ok(())
    }

    fn has_handlers(&self, event: &dyn DomainEvent) -> bool {
        !self
            .rejected_types
            .lock()
            .contains(&event.event_type().to_string())
    }
}

/// Adapter that records every phase it sees
pub struct PhaseProbe {
    name: String,
    priority: i32,
    critical: bool,
    pub phases: Arc<Mutex<Vec<TransactionPhase>>>,
}

impl PhaseProbe {
    pub fn new(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            critical: false,
            phases: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<TransactionPhase> {
        self.phases.lock().clone()
    }
}

#[async_trait]
impl TransactionAdapter for PhaseProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn on_phase(
        &self,
        phase: TransactionPhase,
        _ctx: &TransactionContext,
    ) -> Result<(), AdapterError> {
        self.phases.lock().push(phase);
        Ok(())
    }
}

/// Full in-memory engine wiring for end-to-end tests
pub struct Harness {
    pub db: Arc<NoopDatabase>,
    pub registry: Arc<AdapterRegistry>,
    pub operation_log: Arc<InMemoryOperationLog>,
    pub workflows: Arc<InMemoryWorkflowStateStore>,
    pub published: Arc<InMemoryPublishedEventStore>,
    pub bus: Arc<RecordingBus>,
    pub coordinator: TransactionCoordinator,
    pub tracker: OperationTracker,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(NoopDatabase::new());
        let registry = Arc::new(AdapterRegistry::new());
        let operation_log = Arc::new(InMemoryOperationLog::new());
        let workflows = Arc::new(InMemoryWorkflowStateStore::new());
        let published = Arc::new(InMemoryPublishedEventStore::new());
        let bus = Arc::new(RecordingBus::new());

        let coordinator = TransactionCoordinator::new(
            Arc::clone(&db) as Arc<dyn TransactionalDatabase>,
            Arc::clone(&registry),
            Arc::clone(&operation_log) as Arc<dyn OperationLogStore>,
            Arc::clone(&workflows) as Arc<dyn WorkflowStateStore>,
        );
        let tracker =
            OperationTracker::new(Arc::clone(&operation_log) as Arc<dyn OperationLogStore>);

        Self {
            db,
            registry,
            operation_log,
            workflows,
            published,
            bus,
            coordinator,
            tracker,
        }
    }

    /// Register the Events adapter wired to this harness's bus and store
    pub fn register_events_adapter(&self) {
        self.registry.register(Arc::new(EventsTransactionAdapter::new(
            Arc::clone(&self.bus) as Arc<dyn katalyst_core::EventBus>,
            Arc::clone(&self.published) as Arc<dyn PublishedEventStore>,
        )));
    }

    /// Queue an event on the ambient transaction (panics outside one)
    pub fn queue(&self, event_id: &str, event_type: &str) {
        let ctx = current_transaction().expect("no ambient transaction");
        ctx.events()
            .queue_event(Arc::new(GenericEvent::new(event_id, event_type)));
    }
}

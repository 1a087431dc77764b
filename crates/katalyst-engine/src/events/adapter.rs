//! The Events transaction adapter
//!
//! Buffers nothing itself - the pending queue lives in the transaction
//! context - but owns the three phase reactions that make event publishing
//! transactional:
//!
//! - BEFORE_COMMIT_VALIDATION: every pending event must have a handler, or
//!   the transaction rolls back
//! - BEFORE_COMMIT: publish pending events in queue order, skipping ids the
//!   dedup store already knows; publish failures are logged and the loop
//!   continues (at-least-once for survivors, at-most-once per id)
//! - ON_ROLLBACK: discard the pending queue without publishing or touching
//!   the dedup store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, instrument, warn};

use katalyst_core::EventBus;
use katalyst_storage::PublishedEventStore;

use crate::txn::{AdapterError, TransactionAdapter, TransactionContext, TransactionPhase};

use super::validator::{EventPublishingValidator, EventValidationFailed};

/// Priority the Events adapter registers at
pub const EVENTS_ADAPTER_PRIORITY: i32 = 5;

/// Validates, dedupes and publishes the events buffered in a transaction
pub struct EventsTransactionAdapter {
    bus: Arc<dyn EventBus>,
    published: Arc<dyn PublishedEventStore>,
    validator: EventPublishingValidator,
}

impl EventsTransactionAdapter {
    pub fn new(bus: Arc<dyn EventBus>, published: Arc<dyn PublishedEventStore>) -> Self {
        let validator = EventPublishingValidator::new(Arc::clone(&bus));
        Self {
            bus,
            published,
            validator,
        }
    }

    #[instrument(skip(self, ctx), fields(workflow_id = ctx.workflow_id()))]
    fn validate_pending(&self, ctx: &TransactionContext) -> Result<(), AdapterError> {
        let failures: Vec<_> = ctx
            .events()
            .pending_events()
            .iter()
            .map(|event| self.validator.validate(event.as_ref()))
            .filter(|result| !result.is_valid)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::Validation(EventValidationFailed { failures }))
        }
    }

    #[instrument(skip(self, ctx), fields(workflow_id = ctx.workflow_id()))]
    async fn publish_pending(&self, ctx: &TransactionContext) {
        let pending = ctx.events().pending_events();

        for event in &pending {
            let event_id = event.event_id();

            // A dedup-store read failure counts as "not published": the
            // contract is at-least-once for survivors, so when in doubt we
            // publish rather than silently drop.
            let already_published = match self.published.is_event_published(event_id).await {
                Ok(published) => published,
                Err(err) => {
                    warn!(event_id, "dedup lookup failed, treating as unpublished: {err}");
                    false
                }
            };

            if already_published {
                debug!(event_id, "event already published, skipping");
                continue;
            }

            if let Err(err) = self.bus.publish(event.as_ref()).await {
                // The transaction still commits; the failure is visible in
                // the logs and the id is marked so a retry won't double-send
                error!(
                    event_id,
                    event_type = event.event_type(),
                    "event publish failed: {err}"
                );
            }

            if let Err(err) = self.published.mark_as_published(event_id, Utc::now()).await {
                warn!(event_id, "failed to mark event published: {err}");
            }
        }

        ctx.events().clear_pending_events();
    }
}

#[async_trait]
impl TransactionAdapter for EventsTransactionAdapter {
    fn name(&self) -> &str {
        "Events"
    }

    fn priority(&self) -> i32 {
        EVENTS_ADAPTER_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn on_phase(
        &self,
        phase: TransactionPhase,
        ctx: &TransactionContext,
    ) -> Result<(), AdapterError> {
        match phase {
            TransactionPhase::BeforeCommitValidation => self.validate_pending(ctx),
            TransactionPhase::BeforeCommit => {
                self.publish_pending(ctx).await;
                Ok(())
            }
            TransactionPhase::OnRollback => {
                let discarded = ctx.events().pending_event_count();
                if discarded > 0 {
                    debug!(
                        workflow_id = ctx.workflow_id(),
                        discarded, "discarding pending events on rollback"
                    );
                }
                ctx.events().clear_pending_events();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katalyst_core::{DomainEvent, GenericEvent};
    use katalyst_storage::InMemoryPublishedEventStore;
    use parking_lot::Mutex;

    /// Bus that records published event ids and can reject types or fail
    pub(crate) struct RecordingBus {
        pub published: Mutex<Vec<String>>,
        pub rejected_types: Vec<String>,
        pub fail_publish_for: Vec<String>,
    }

    impl RecordingBus {
        pub fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                rejected_types: Vec::new(),
                fail_publish_for: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, event: &dyn DomainEvent) -> anyhow::Result<()> {
            if self.fail_publish_for.contains(&event.event_id().to_string()) {
                anyhow::bail!("bus refused {}", event.event_id());
            }
            self.published.lock().push(event.event_id().to_string());
            Ok(())
        }

        fn has_handlers(&self, event: &dyn DomainEvent) -> bool {
            !self.rejected_types.contains(&event.event_type().to_string())
        }
    }

    fn ctx_with_events(ids: &[(&str, &str)]) -> TransactionContext {
        let ctx = TransactionContext::new("wf-1", "test");
        for (id, ty) in ids {
            ctx.events().queue_event(Arc::new(GenericEvent::new(*id, *ty)));
        }
        ctx
    }

    #[tokio::test]
    async fn test_publishes_in_queue_order_and_marks() {
        let bus = Arc::new(RecordingBus::new());
        let store = Arc::new(InMemoryPublishedEventStore::new());
        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&store) as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "a"), ("e2", "b")]);
        adapter
            .on_phase(TransactionPhase::BeforeCommit, &ctx)
            .await
            .unwrap();

        assert_eq!(*bus.published.lock(), vec!["e1", "e2"]);
        assert!(store.is_event_published("e1").await.unwrap());
        assert!(store.is_event_published("e2").await.unwrap());
        assert_eq!(ctx.events().pending_event_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_skipped_without_remark() {
        let bus = Arc::new(RecordingBus::new());
        let store = Arc::new(InMemoryPublishedEventStore::new());
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        store.seed("e1", earlier);

        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&store) as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "a"), ("e2", "b")]);
        adapter
            .on_phase(TransactionPhase::BeforeCommit, &ctx)
            .await
            .unwrap();

        // Only the new event hit the bus; the duplicate kept its timestamp
        assert_eq!(*bus.published.lock(), vec!["e2"]);
        assert_eq!(store.published_count().await.unwrap(), 2);
        assert_eq!(
            store
                .published_count_before(earlier + chrono::Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(ctx.events().pending_event_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_still_marks_and_continues() {
        let mut bus = RecordingBus::new();
        bus.fail_publish_for = vec!["e1".to_string()];
        let bus = Arc::new(bus);
        let store = Arc::new(InMemoryPublishedEventStore::new());

        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&store) as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "a"), ("e2", "b")]);
        adapter
            .on_phase(TransactionPhase::BeforeCommit, &ctx)
            .await
            .unwrap();

        // e1 failed to publish but was still marked; e2 went through
        assert_eq!(*bus.published.lock(), vec!["e2"]);
        assert!(store.is_event_published("e1").await.unwrap());
        assert!(store.is_event_published("e2").await.unwrap());
    }

    #[tokio::test]
    async fn test_validation_rejects_unhandled_types() {
        let mut bus = RecordingBus::new();
        bus.rejected_types = vec!["bad".to_string()];
        let bus = Arc::new(bus);
        let store = Arc::new(InMemoryPublishedEventStore::new());

        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            store as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "bad"), ("e2", "good")]);
        let err = adapter
            .on_phase(TransactionPhase::BeforeCommitValidation, &ctx)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bad"));
        assert!(bus.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_discards_without_publishing() {
        let bus = Arc::new(RecordingBus::new());
        let store = Arc::new(InMemoryPublishedEventStore::new());

        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&store) as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "a")]);
        adapter
            .on_phase(TransactionPhase::OnRollback, &ctx)
            .await
            .unwrap();

        assert!(bus.published.lock().is_empty());
        assert_eq!(store.published_count().await.unwrap(), 0);
        assert_eq!(ctx.events().pending_event_count(), 0);
    }

    #[tokio::test]
    async fn test_other_phases_are_noops() {
        let bus = Arc::new(RecordingBus::new());
        let store = Arc::new(InMemoryPublishedEventStore::new());
        let adapter = EventsTransactionAdapter::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            store as Arc<dyn PublishedEventStore>,
        );

        let ctx = ctx_with_events(&[("e1", "a")]);
        for phase in [
            TransactionPhase::BeforeBegin,
            TransactionPhase::AfterBegin,
            TransactionPhase::AfterCommit,
            TransactionPhase::AfterRollback,
        ] {
            adapter.on_phase(phase, &ctx).await.unwrap();
        }

        assert_eq!(ctx.events().pending_event_count(), 1);
        assert!(bus.published.lock().is_empty());
    }
}

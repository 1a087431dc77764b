//! Domain-event and event-bus contracts
//!
//! The engine buffers events during a transaction and publishes them after
//! commit through an externally-provided bus. Handler registration and
//! dispatch live behind the [`EventBus`] seam and are not this crate's
//! concern.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to every domain event
///
/// `event_type` is the only required field; everything else is opaque to
/// the framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    /// Runtime type name of the event, used for handler lookup
    pub event_type: String,

    /// When the event was raised
    pub occurred_at: DateTime<Utc>,

    /// Free-form attributes carried alongside the event
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// A domain event raised inside a transaction
///
/// `event_id` must be non-empty and globally unique for the life of the
/// dedup store - it is the key that makes publishing idempotent across
/// retries.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Stable unique identifier for this event instance
    fn event_id(&self) -> &str;

    fn metadata(&self) -> &EventMetadata;

    /// Opaque payload forwarded to the bus; the framework never inspects it
    fn payload(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Convenience accessor for the metadata's event type
    fn event_type(&self) -> &str {
        &self.metadata().event_type
    }
}

/// Ready-made [`DomainEvent`] carrying a JSON payload
///
/// Applications with richer event types implement [`DomainEvent`] directly;
/// this one covers tests and simple integrations.
#[derive(Debug, Clone)]
pub struct GenericEvent {
    event_id: String,
    metadata: EventMetadata,
    payload: serde_json::Value,
}

impl GenericEvent {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            metadata: EventMetadata::new(event_type),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl DomainEvent for GenericEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn payload(&self) -> serde_json::Value {
        self.payload.clone()
    }
}

/// The externally-provided event bus
///
/// `publish` may suspend and may fail; `has_handlers` is a pure predicate
/// answering "is any handler registered for this event's runtime type?".
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &dyn DomainEvent) -> anyhow::Result<()>;

    fn has_handlers(&self, event: &dyn DomainEvent) -> bool;
}

#[async_trait]
impl<B: EventBus + ?Sized> EventBus for Arc<B> {
    async fn publish(&self, event: &dyn DomainEvent) -> anyhow::Result<()> {
        (**self).publish(event).await
    }

    fn has_handlers(&self, event: &dyn DomainEvent) -> bool {
        (**self).has_handlers(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_event() {
        let event = GenericEvent::new("evt-1", "user.registered")
            .with_payload(serde_json::json!({ "user_id": "u-42" }));

        assert_eq!(event.event_id(), "evt-1");
        assert_eq!(event.event_type(), "user.registered");
        assert_eq!(event.payload()["user_id"], "u-42");
    }

    #[test]
    fn test_metadata_attributes() {
        let metadata = EventMetadata::new("order.placed")
            .with_attribute("source", serde_json::json!("checkout"));

        assert_eq!(metadata.event_type, "order.placed");
        assert_eq!(metadata.attributes["source"], "checkout");
    }
}

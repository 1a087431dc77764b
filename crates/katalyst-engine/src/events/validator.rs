//! Pre-commit event validation

use std::sync::Arc;

use katalyst_core::{DomainEvent, EventBus};

/// Outcome of validating one pending event
#[derive(Debug, Clone)]
pub struct EventValidationResult {
    pub event_id: String,
    pub event_type: String,
    pub is_valid: bool,
    pub error: Option<String>,
}

/// Raised when one or more pending events fail validation
///
/// Registered as a critical adapter failure, this forces the enclosing
/// transaction to roll back. The Display output names every failing event
/// type so the caller can see what was rejected.
#[derive(Debug)]
pub struct EventValidationFailed {
    pub failures: Vec<EventValidationResult>,
}

impl std::error::Error for EventValidationFailed {}

impl std::fmt::Display for EventValidationFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} event(s) failed validation:", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                " [{} '{}': {}]",
                failure.event_type,
                failure.event_id,
                failure.error.as_deref().unwrap_or("invalid")
            )?;
        }
        Ok(())
    }
}

/// Checks that every pending event can actually be handled
///
/// The default implementation asks the bus whether any handler is
/// registered for the event's runtime type; an event nobody listens to is
/// almost always a wiring bug, and publishing it would silently drop the
/// domain fact it carries.
pub struct EventPublishingValidator {
    bus: Arc<dyn EventBus>,
}

impl EventPublishingValidator {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub fn validate(&self, event: &dyn DomainEvent) -> EventValidationResult {
        let event_type = event.event_type().to_string();
        if self.bus.has_handlers(event) {
            EventValidationResult {
                event_id: event.event_id().to_string(),
                event_type,
                is_valid: true,
                error: None,
            }
        } else {
            EventValidationResult {
                event_id: event.event_id().to_string(),
                error: Some(format!("no handler registered for event type '{event_type}'")),
                event_type,
                is_valid: false,
            }
        }
    }
}

//! Unified event bus — trait for emitting engine telemetry from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to emit step-level send/skip/fail
//! telemetry and workflow-level execution events toward the external
//! analytics collaborator.

use crate::types::{AnalyticsEvent, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Trait for emitting telemetry events. The engine never depends on where
/// they go; format and retention are the consumer's concern.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AnalyticsEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AnalyticsEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AnalyticsEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating `AnalyticsEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EventType,
    workflow_id: Option<Uuid>,
    execution_id: Option<Uuid>,
    user_id: Option<String>,
) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        workflow_id,
        execution_id,
        user_id,
        step_id: None,
        detail: None,
        node_id: "local".into(),
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let wf = Uuid::new_v4();
        let exec = Uuid::new_v4();
        sink.emit(make_event(
            EventType::ExecutionStarted,
            Some(wf),
            Some(exec),
            Some("user-1".into()),
        ));
        sink.emit(make_event(
            EventType::EmailSent,
            Some(wf),
            Some(exec),
            Some("user-1".into()),
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EventType::ExecutionStarted), 1);
        assert_eq!(sink.count_type(EventType::EmailSent), 1);

        let events = sink.events();
        assert_eq!(events[0].workflow_id, Some(wf));
        assert_eq!(events[1].user_id, Some("user-1".into()));
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(EventType::StepExecuted, None, None, None));
    }
}

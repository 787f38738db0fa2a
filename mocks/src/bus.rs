//! Recording event bus for in-process delivery in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use task_core::{
    error::{CoreError, Result},
    events::{EventBus, EventEnvelope},
};

/// Event bus that records every published envelope instead of talking to a
/// sidecar. Tests drain the record and hand envelopes to worker handlers
/// directly, which also makes redelivery trivial to simulate.
#[derive(Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<(String, EventEnvelope)>>,
    fail_next: Mutex<Option<CoreError>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next publish with the given error
    pub fn fail_next(&self, error: CoreError) {
        *self.fail_next.lock() = Some(error);
    }

    /// All published (topic, envelope) pairs, in publish order
    pub fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.published.lock().clone()
    }

    /// Published envelopes on one topic
    pub fn published_on(&self, topic: &str) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Drop every recorded publish
    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<()> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.published
            .lock()
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

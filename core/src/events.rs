use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{DueReminder, Task},
};

/// Topic carrying `task.completed` events
pub const TOPIC_TASK_EVENTS: &str = "task-events";
/// Topic carrying `reminder.due` events
pub const TOPIC_REMINDERS: &str = "reminders";

/// Event type stamped on completion events
pub const EVENT_TASK_COMPLETED: &str = "task.completed";
/// Event type stamped on matured reminders
pub const EVENT_REMINDER_DUE: &str = "reminder.due";

/// Framed envelope shared by both topics.
///
/// `event_id` is globally unique and is the consumer's idempotency key.
/// Consumers must ignore unknown payload fields for forward compatibility,
/// which serde does by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub owner_id: Uuid,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a `task.completed` envelope from the just-flipped task row.
    ///
    /// Called inside the store transaction that commits the flip, so the
    /// envelope and the state change are durably linked (outbox discipline).
    pub fn task_completed(task: &Task, completed_at: DateTime<Utc>) -> Self {
        let payload = TaskCompletedPayload {
            task_id: task.id,
            owner_id: task.owner_id,
            title: task.title.clone(),
            priority: task.priority.as_str().to_string(),
            completed_at,
            recurrence: task.recurrence.as_str().to_string(),
            due_at: task.due_at,
            parent_task_id: task.parent_task_id,
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type: EVENT_TASK_COMPLETED.to_string(),
            emitted_at: completed_at,
            owner_id: task.owner_id,
            payload: serde_json::to_value(payload).expect("payload serializes"),
        }
    }

    /// Build a `reminder.due` envelope for a claimed reminder row.
    pub fn reminder_due(reminder: &DueReminder, emitted_at: DateTime<Utc>) -> Self {
        let payload = ReminderDuePayload {
            task_id: reminder.task_id,
            owner_id: reminder.owner_id,
            owner_email: reminder.owner_email.clone(),
            title: reminder.title.clone(),
            remind_at: reminder.remind_at,
            due_at: reminder.due_at,
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type: EVENT_REMINDER_DUE.to_string(),
            emitted_at,
            owner_id: reminder.owner_id,
            payload: serde_json::to_value(payload).expect("payload serializes"),
        }
    }

    /// Decode the payload into a typed struct, ignoring unknown fields.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CoreError::Permanent(format!("malformed event payload: {e}")))
    }
}

/// Payload of `task.completed` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletedPayload {
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub priority: String,
    pub completed_at: DateTime<Utc>,
    pub recurrence: String,
    pub due_at: Option<DateTime<Utc>>,
    pub parent_task_id: Option<Uuid>,
}

/// Payload of `reminder.due` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderDuePayload {
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: String,
    pub title: String,
    pub remind_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Outbound topic publisher.
///
/// The bus is at-least-once and may reorder; consumers reconcile with the
/// envelope's event id and by re-reading authoritative state. Publish
/// failures must not roll back state changes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one envelope to a topic.
    ///
    /// # Returns
    /// * `Ok(())` - The bus accepted the envelope
    /// * `Err(CoreError::Transient)` - The bus is unavailable; retry later
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<()>;
}

/// Bus used when event publication is disabled by configuration. Publishes
/// are no-ops and the recurrence/reminder pipelines degrade gracefully.
#[derive(Debug, Default, Clone)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<()> {
        tracing::debug!(
            topic = topic,
            event_id = %event.event_id,
            event_type = %event.event_type,
            "Event bus disabled; dropping event"
        );
        Ok(())
    }
}

/// Outcome of handling one delivered event, mapped by subscription endpoints
/// to acknowledgment, redelivery, or discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Handled (or deduplicated); acknowledge to the bus
    Ack,
    /// Transient failure; return failure so the bus redelivers
    Retry,
    /// Permanent failure; log and discard
    Drop,
}

/// Persisted outbox entry awaiting publication
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub topic: String,
    pub envelope: EventEnvelope,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

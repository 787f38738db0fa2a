use std::sync::Arc;

use chrono::Utc;
use task_core::{
    error::CoreError,
    events::{EventEnvelope, HandlerOutcome, TaskCompletedPayload},
    models::NewTask,
    recurrence::{next_due_at, next_remind_at},
    repository::ProcessedEventRepository,
    service::TaskService,
};

/// Consumer name in the processed-events set
pub const CONSUMER: &str = "recurrence-worker";

/// Consumes `task.completed` and creates exactly one successor for each
/// completion of a recurring task.
///
/// Idempotency against redelivery is keyed by the envelope's event id; the
/// worker re-reads the source task through TaskCore with its service
/// principal instead of trusting the event payload.
#[derive(Clone)]
pub struct RecurrenceWorker {
    service: TaskService,
    processed: Arc<dyn ProcessedEventRepository>,
}

impl RecurrenceWorker {
    pub fn new(service: TaskService, processed: Arc<dyn ProcessedEventRepository>) -> Self {
        Self { service, processed }
    }

    /// Handle one delivered completion event.
    pub async fn handle(&self, envelope: &EventEnvelope) -> HandlerOutcome {
        match self.process(envelope).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                tracing::warn!(event_id = %envelope.event_id, error = %e, "Transient failure; requesting redelivery");
                HandlerOutcome::Retry
            }
            Err(e) => {
                tracing::error!(event_id = %envelope.event_id, error = %e, "Permanent failure; acknowledging");
                HandlerOutcome::Ack
            }
        }
    }

    async fn process(&self, envelope: &EventEnvelope) -> task_core::Result<HandlerOutcome> {
        if self.processed.is_processed(CONSUMER, envelope.event_id).await? {
            tracing::debug!(event_id = %envelope.event_id, "Duplicate delivery; acknowledging");
            return Ok(HandlerOutcome::Ack);
        }

        let payload: TaskCompletedPayload = match envelope.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(event_id = %envelope.event_id, error = %e, "Malformed completion payload");
                return Ok(HandlerOutcome::Drop);
            }
        };

        // re-read authoritative state; the event may be stale or reordered
        let source = match self.service.get_task(payload.owner_id, payload.task_id).await {
            Ok(task) => task,
            Err(CoreError::NotFound(_)) => {
                tracing::info!(
                    event_id = %envelope.event_id,
                    task_id = %payload.task_id,
                    "Source task gone; recording and acknowledging"
                );
                self.processed.mark_processed(CONSUMER, envelope.event_id).await?;
                return Ok(HandlerOutcome::Ack);
            }
            Err(e) => return Err(e),
        };

        if !source.recurrence.is_recurring() {
            self.processed.mark_processed(CONSUMER, envelope.event_id).await?;
            return Ok(HandlerOutcome::Ack);
        }

        let now = Utc::now();
        let base = source.due_at.unwrap_or(payload.completed_at);
        let Some(due_at) = next_due_at(source.recurrence, base, now) else {
            self.processed.mark_processed(CONSUMER, envelope.event_id).await?;
            return Ok(HandlerOutcome::Ack);
        };

        // preserve the reminder offset; a successor reminder that would
        // already be past is dropped rather than violating the
        // future-reminder invariant
        let remind_at = next_remind_at(source.remind_at, source.due_at, Some(due_at))
            .filter(|at| *at > now);

        let successor = NewTask {
            owner_id: source.owner_id,
            title: source.title.clone(),
            description: source.description.clone(),
            priority: source.priority,
            due_at: Some(due_at),
            remind_at,
            recurrence: source.recurrence,
            parent_task_id: Some(source.id),
            tags: source.tags.clone(),
        };
        let created = self.service.create_task(source.owner_id, successor).await?;

        self.processed.mark_processed(CONSUMER, envelope.event_id).await?;
        tracing::info!(
            event_id = %envelope.event_id,
            source_task_id = %source.id,
            successor_task_id = %created.id,
            due_at = %due_at,
            "Created successor for recurring task"
        );
        Ok(HandlerOutcome::Ack)
    }
}

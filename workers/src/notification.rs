use std::collections::HashMap;
use std::sync::Arc;

use task_core::{
    clients::{EmailMessage, EmailSender},
    events::{EventEnvelope, HandlerOutcome, ReminderDuePayload},
    repository::ProcessedEventRepository,
};
use tokio::sync::Mutex;

/// Consumer name in the processed-events set
pub const CONSUMER: &str = "notification-worker";

/// Consumes `reminder.due` and delivers a notification through the email
/// capability, deduplicated by event id.
pub struct NotificationWorker {
    processed: Arc<dyn ProcessedEventRepository>,
    email: Arc<dyn EmailSender>,
    /// Deliveries to the same mailbox are serialized so a recipient never
    /// observes reordered notifications
    recipient_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NotificationWorker {
    pub fn new(processed: Arc<dyn ProcessedEventRepository>, email: Arc<dyn EmailSender>) -> Self {
        Self {
            processed,
            email,
            recipient_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one delivered reminder event.
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

        let payload: ReminderDuePayload = match envelope.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(event_id = %envelope.event_id, error = %e, "Malformed reminder payload");
                return Ok(HandlerOutcome::Drop);
            }
        };

        let message = render(&payload);
        let lock = self.lock_for(&payload.owner_email).await;
        let _guard = lock.lock().await;
        self.email.send(&message).await?;

        self.processed.mark_processed(CONSUMER, envelope.event_id).await?;
        tracing::info!(
            event_id = %envelope.event_id,
            task_id = %payload.task_id,
            "Reminder notification delivered"
        );
        Ok(HandlerOutcome::Ack)
    }

    async fn lock_for(&self, recipient: &str) -> Arc<Mutex<()>> {
        let mut locks = self.recipient_locks.lock().await;
        locks
            .entry(recipient.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn render(payload: &ReminderDuePayload) -> EmailMessage {
    let mut body = format!(
        "This is your reminder for \"{}\".\n\nReminder time: {}\n",
        payload.title,
        payload.remind_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(due_at) = payload.due_at {
        body.push_str(&format!("Due: {}\n", due_at.format("%Y-%m-%d %H:%M UTC")));
    }
    EmailMessage {
        to: payload.owner_email.clone(),
        subject: format!("Reminder: {}", payload.title),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_render_includes_due_date_when_present() {
        let payload = ReminderDuePayload {
            task_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            owner_email: "a@x.y".to_string(),
            title: "water plants".to_string(),
            remind_at: "2025-03-01T09:00:00Z".parse().unwrap(),
            due_at: Some("2025-03-02T09:00:00Z".parse().unwrap()),
        };
        let message = render(&payload);
        assert_eq!(message.to, "a@x.y");
        assert_eq!(message.subject, "Reminder: water plants");
        assert!(message.body.contains("2025-03-01 09:00 UTC"));
        assert!(message.body.contains("Due: 2025-03-02 09:00 UTC"));

        let undated = ReminderDuePayload { due_at: None, ..payload };
        assert!(!render(&undated).body.contains("Due:"));
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use task_core::{
    error::Result,
    events::{EventBus, EventEnvelope, TOPIC_REMINDERS},
    repository::TaskRepository,
};
use tokio::sync::watch;

/// Periodic sweep promoting matured reminders to `reminder.due` events.
///
/// The claim (flipping `reminder_sent`) commits before any publish, which
/// yields at-most-once emission: a scheduler that crashes between claim and
/// publish loses at most one reminder instead of ever duplicating one. The
/// claim statement is atomic, so concurrent scheduler instances never take
/// the same row.
pub struct ReminderScheduler {
    tasks: Arc<dyn TaskRepository>,
    bus: Arc<dyn EventBus>,
    tick: Duration,
    batch: u32,
}

impl ReminderScheduler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        bus: Arc<dyn EventBus>,
        tick: Duration,
        batch: u32,
    ) -> Self {
        Self { tasks, bus, tick, batch }
    }

    /// Run sweeps on the configured cadence until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(tick_secs = self.tick.as_secs(), batch = self.batch, "Reminder scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Sweep emitted reminders"),
                        Err(e) => tracing::error!(error = %e, "Sweep failed; will retry next tick"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Reminder scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One sweep: claim matured rows, then publish one event per row.
    ///
    /// `now` is read once so every row in the batch is judged against the
    /// same instant.
    pub async fn sweep_once(&self) -> Result<usize> {
        let now = Utc::now();
        let claimed = self.tasks.claim_due_reminders(now, self.batch).await?;
        let mut emitted = 0;

        for reminder in &claimed {
            let envelope = EventEnvelope::reminder_due(reminder, now);
            match self.bus.publish(TOPIC_REMINDERS, &envelope).await {
                Ok(()) => emitted += 1,
                Err(e) => {
                    // the row is already marked sent; losing this reminder
                    // is the accepted cost of never duplicating one
                    tracing::error!(
                        task_id = %reminder.task_id,
                        event_id = %envelope.event_id,
                        error = %e,
                        "Reminder claimed but publish failed"
                    );
                }
            }
        }
        Ok(emitted)
    }
}

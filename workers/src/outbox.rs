use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use task_core::{
    error::Result,
    events::EventBus,
    repository::OutboxRepository,
};
use tokio::sync::watch;

/// How long published entries are kept before pruning, in hours
const RETENTION_HOURS: i64 = 24;

/// Drains the outbox to the event bus.
///
/// State changes commit their intent-to-publish in the same transaction;
/// this publisher moves those records to the bus afterwards. A bus outage
/// therefore delays events instead of losing them, and the authoritative
/// state never rolls back over publish failures.
pub struct OutboxPublisher {
    outbox: Arc<dyn OutboxRepository>,
    bus: Arc<dyn EventBus>,
    interval: Duration,
    batch: u32,
}

impl OutboxPublisher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        bus: Arc<dyn EventBus>,
        interval: Duration,
        batch: u32,
    ) -> Self {
        Self { outbox, bus, interval, batch }
    }

    /// Drain on a fixed cadence until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Outbox publisher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.drain_once().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count, "Outbox entries published"),
                        Err(e) => tracing::error!(error = %e, "Outbox drain failed; will retry"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // final best-effort drain so a clean shutdown leaves
                        // no stranded events
                        if let Err(e) = self.drain_once().await {
                            tracing::warn!(error = %e, "Final outbox drain failed");
                        }
                        tracing::info!("Outbox publisher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Publish pending entries oldest-first; stop at the first bus failure
    /// so ordering within the backlog is preserved across retries.
    pub async fn drain_once(&self) -> Result<usize> {
        let pending = self.outbox.pending(self.batch).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(pending.len());
        for entry in &pending {
            match self.bus.publish(&entry.topic, &entry.envelope).await {
                Ok(()) => published.push(entry.id),
                Err(e) => {
                    tracing::warn!(
                        outbox_id = entry.id,
                        event_id = %entry.envelope.event_id,
                        error = %e,
                        "Publish failed; leaving entry pending"
                    );
                    break;
                }
            }
        }

        let now = Utc::now();
        if !published.is_empty() {
            self.outbox.mark_published(&published, now).await?;
        }
        self.outbox
            .prune_published(now - chrono::Duration::hours(RETENTION_HOURS))
            .await?;
        Ok(published.len())
    }
}

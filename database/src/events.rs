use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use task_core::{
    error::{CoreError, Result},
    events::{EventEnvelope, OutboxEntry},
    repository::{OutboxRepository, ProcessedEventRepository},
};
use uuid::Uuid;

use crate::common::sqlx_error_to_core_error;
use crate::sqlite::SqliteStore;

#[async_trait]
impl ProcessedEventRepository for SqliteStore {
    async fn is_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM processed_events WHERE consumer = ? AND event_id = ?",
        )
        .bind(consumer)
        .bind(event_id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_events (consumer, event_id, processed_at) \
             VALUES (?, ?, ?)",
        )
        .bind(consumer)
        .bind(event_id.to_string())
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutboxRepository for SqliteStore {
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            "SELECT id, topic, envelope, created_at, published_at FROM outbox \
             WHERE published_at IS NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        rows.iter()
            .map(|row| {
                let raw: String = row.get("envelope");
                let envelope: EventEnvelope = serde_json::from_str(&raw).map_err(|e| {
                    CoreError::Database(format!("Malformed outbox envelope: {e}"))
                })?;
                Ok(OutboxEntry {
                    id: row.get("id"),
                    topic: row.get("topic"),
                    envelope,
                    created_at: row.get("created_at"),
                    published_at: row.get("published_at"),
                })
            })
            .collect()
    }

    async fn mark_published(&self, ids: &[i64], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE outbox SET published_at = ");
        qb.push_bind(at);
        qb.push(" WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        qb.push(")");

        qb.build()
            .execute(self.pool())
            .await
            .map_err(sqlx_error_to_core_error)?;
        Ok(())
    }

    async fn prune_published(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox WHERE published_at IS NOT NULL AND published_at < ?",
        )
        .bind(older_than)
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        Ok(result.rows_affected())
    }
}

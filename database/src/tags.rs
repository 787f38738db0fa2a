use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use task_core::{
    error::Result,
    models::{Tag, Task},
    repository::TagRepository,
};
use uuid::Uuid;

use crate::common::{row_to_task, sqlx_error_to_core_error, uuid_from_row, TASK_COLUMNS};
use crate::sqlite::{upsert_tag_and_attach, SqliteStore};

#[async_trait]
impl TagRepository for SqliteStore {
    async fn list_tags(&self, owner: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, created_at FROM tags WHERE owner_id = ? ORDER BY name",
        )
        .bind(owner.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        rows.iter()
            .map(|row| {
                Ok(Tag {
                    id: uuid_from_row(row, "id")?,
                    owner_id: uuid_from_row(row, "owner_id")?,
                    name: row.get("name"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn attach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
        let mut tx = self.pool().begin().await.map_err(sqlx_error_to_core_error)?;

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND owner_id = ?"
        ))
        .bind(task_id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_error_to_core_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let task = row_to_task(&row)?;

        upsert_tag_and_attach(&mut tx, task_id, owner, name, Utc::now()).await?;
        tx.commit().await.map_err(sqlx_error_to_core_error)?;

        Ok(Some(self.hydrate_one(task).await?))
    }

    async fn detach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND owner_id = ?"
        ))
        .bind(task_id.to_string())
        .bind(owner.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let task = row_to_task(&row)?;

        // removing an absent association is a no-op
        sqlx::query(
            "DELETE FROM task_tags WHERE task_id = ? \
             AND tag_id IN (SELECT id FROM tags WHERE owner_id = ? AND name = ?)",
        )
        .bind(task_id.to_string())
        .bind(owner.to_string())
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        Ok(Some(self.hydrate_one(task).await?))
    }

    async fn delete_tag(&self, owner: Uuid, name: &str) -> Result<bool> {
        // associations cascade via the task_tags foreign key
        let result = sqlx::query("DELETE FROM tags WHERE owner_id = ? AND name = ?")
            .bind(owner.to_string())
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(sqlx_error_to_core_error)?;
        Ok(result.rows_affected() > 0)
    }
}

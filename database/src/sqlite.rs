use std::collections::HashMap;

use crate::common::{row_to_task, sqlx_error_to_core_error, uuid_from_row, TASK_COLUMNS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::MigrateDatabase, sqlite::SqlitePoolOptions, QueryBuilder, Row, Sqlite, SqlitePool,
};
use task_core::{
    error::{CoreError, Result},
    events::{EventEnvelope, TOPIC_TASK_EVENTS},
    models::{DueReminder, NewTask, SortDirection, SortKey, Task, TaskChanges, TaskFilter},
    repository::TaskRepository,
};
use uuid::Uuid;

/// SQLite-backed store implementing every repository trait of the core.
///
/// One pool serves all repositories; the row-level transaction boundary of
/// SQLite is the per-task serialization point the core relies on.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with default pool settings; see [`SqliteStore::with_options`].
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_options(database_url, 10, std::time::Duration::from_secs(30)).await
    }

    /// Connect to the given database URL (file path or `:memory:`).
    ///
    /// File-backed databases are created on first use and run in WAL mode;
    /// in-memory databases are capped to a single connection so every
    /// handle sees the same data. `max_connections` is the process's
    /// effective parallelism cap against the store.
    pub async fn with_options(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:")
            || database_url.starts_with("sqlite://")
        {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        let in_memory = db_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url).await.map_err(|error| {
                tracing::error!("Error creating database: {}", error);
                CoreError::Database(format!("Failed to create database: {error}"))
            })?;
            tracing::info!("Database created");
        }

        let connect_options = if in_memory {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .acquire_timeout(acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(sqlx_error_to_core_error)?;

        Ok(Self { pool })
    }

    /// Apply pending migrations; call once after connecting.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Database(format!("Migration failed: {e}")))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Direct pool access for custom statements in tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch tag names for a batch of tasks in one query.
    pub(crate) async fn tags_for_tasks(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<String>>> {
        let mut map: HashMap<Uuid, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(map);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT tt.task_id AS task_id, g.name AS name \
             FROM task_tags tt JOIN tags g ON g.id = tt.tag_id \
             WHERE tt.task_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        qb.push(") ORDER BY g.name");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;

        for row in rows {
            let task_id = uuid_from_row(&row, "task_id")?;
            let name: String = row.get("name");
            map.entry(task_id).or_default().push(name);
        }
        Ok(map)
    }

    pub(crate) async fn hydrate_tags(&self, mut tasks: Vec<Task>) -> Result<Vec<Task>> {
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let mut map = self.tags_for_tasks(&ids).await?;
        for task in &mut tasks {
            task.tags = map.remove(&task.id).unwrap_or_default();
        }
        Ok(tasks)
    }

    pub(crate) async fn hydrate_one(&self, task: Task) -> Result<Task> {
        let mut tasks = self.hydrate_tags(vec![task]).await?;
        tasks
            .pop()
            .ok_or_else(|| CoreError::Internal("hydration dropped a task".to_string()))
    }
}

fn order_clause(sort: SortKey, direction: SortDirection) -> String {
    let dir = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let key = match sort {
        SortKey::CreatedAt => format!("created_at {dir}"),
        SortKey::UpdatedAt => format!("updated_at {dir}"),
        // Nulls last ascending, first descending: "no due date" must never
        // read as "most urgent".
        SortKey::DueAt => match direction {
            SortDirection::Asc => "due_at IS NULL ASC, due_at ASC".to_string(),
            SortDirection::Desc => "due_at IS NULL DESC, due_at DESC".to_string(),
        },
        SortKey::Priority => format!(
            "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END {dir}"
        ),
        SortKey::Title => format!("lower(title) {dir}"),
    };
    // stable tiebreak keeps repeated listings identical
    format!("{key}, id ASC")
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn create(&self, new_task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_core_error)?;

        let row = sqlx::query(&format!(
            "INSERT INTO tasks (id, owner_id, title, description, completed, priority, \
             due_at, remind_at, reminder_sent, recurrence, parent_task_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?, 0, ?, ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(new_task.owner_id.to_string())
        .bind(&new_task.title)
        .bind(&new_task.description)
        .bind(new_task.priority.as_str())
        .bind(new_task.due_at)
        .bind(new_task.remind_at)
        .bind(new_task.recurrence.as_str())
        .bind(new_task.parent_task_id.map(|p| p.to_string()))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_core_error)?;

        for name in &new_task.tags {
            upsert_tag_and_attach(&mut tx, id, new_task.owner_id, name, now).await?;
        }

        tx.commit().await.map_err(sqlx_error_to_core_error)?;

        let mut task = row_to_task(&row)?;
        // tags come back in the same order hydration yields them
        task.tags = new_task.tags;
        task.tags.sort();
        Ok(task)
    }

    async fn get(&self, id: Uuid, owner: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND owner_id = ?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_core_error)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let task = row_to_task(&row)?;
                Ok(Some(self.hydrate_one(task).await?))
            }
        }
    }

    async fn list(
        &self,
        owner: Uuid,
        filter: &TaskFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = "));
        qb.push_bind(owner.to_string());

        if let Some(priority) = filter.priority {
            qb.push(" AND priority = ");
            qb.push_bind(priority.as_str());
        }
        if let Some(completed) = filter.completed {
            qb.push(" AND completed = ");
            qb.push_bind(completed);
        }
        if filter.overdue {
            qb.push(" AND completed = 0 AND due_at IS NOT NULL AND due_at < ");
            qb.push_bind(now);
        }
        if let Some(tag) = &filter.tag {
            qb.push(
                " AND EXISTS (SELECT 1 FROM task_tags tt JOIN tags g ON g.id = tt.tag_id \
                 WHERE tt.task_id = tasks.id AND g.name = ",
            );
            qb.push_bind(tag.clone());
            qb.push(")");
        }

        qb.push(" ORDER BY ");
        qb.push(order_clause(filter.sort, filter.direction));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;

        let tasks = rows
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<Task>>>()?;
        self.hydrate_tags(tasks).await
    }

    async fn search(&self, owner: Uuid, query: &str) -> Result<Vec<Task>> {
        // instr-based matching sidesteps LIKE wildcard escaping
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ? \
             AND (instr(lower(title), lower(?)) > 0 \
              OR instr(lower(coalesce(description, '')), lower(?)) > 0) \
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(owner.to_string())
        .bind(query)
        .bind(query)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_core_error)?;

        let tasks = rows
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<Task>>>()?;
        self.hydrate_tags(tasks).await
    }

    async fn update(&self, id: Uuid, owner: Uuid, changes: TaskChanges) -> Result<Option<Task>> {
        if changes.is_empty() {
            return self.get(id, owner).await;
        }

        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
        qb.push_bind(now);

        if let Some(title) = &changes.title {
            qb.push(", title = ");
            qb.push_bind(title.trim().to_string());
        }
        if let Some(description) = &changes.description {
            qb.push(", description = ");
            qb.push_bind(description.clone());
        }
        if let Some(priority) = changes.priority {
            qb.push(", priority = ");
            qb.push_bind(priority.as_str());
        }
        if let Some(due_at) = changes.due_at {
            qb.push(", due_at = ");
            qb.push_bind(due_at);
        }
        if let Some(remind_at) = changes.remind_at {
            // any reminder change resets the sent marker; a cleared reminder
            // may later be replaced by a fresh one
            qb.push(", remind_at = ");
            qb.push_bind(remind_at);
            qb.push(", reminder_sent = 0");
        }
        if let Some(recurrence) = changes.recurrence {
            qb.push(", recurrence = ");
            qb.push_bind(recurrence.as_str());
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());
        qb.push(" AND owner_id = ");
        qb.push_bind(owner.to_string());
        qb.push(format!(" RETURNING {TASK_COLUMNS}"));

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let task = row_to_task(&row)?;
                Ok(Some(self.hydrate_one(task).await?))
            }
        }
    }

    async fn delete(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn toggle_completed(
        &self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_core_error)?;

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND owner_id = ?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_error_to_core_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = row_to_task(&row)?;
        task.completed = !task.completed;
        task.updated_at = now;

        sqlx::query("UPDATE tasks SET completed = ?, updated_at = ? WHERE id = ?")
            .bind(task.completed)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_core_error)?;

        if task.completed {
            // outbox discipline: the event record commits with the flip
            let envelope = EventEnvelope::task_completed(&task, now);
            let body = serde_json::to_string(&envelope)
                .map_err(|e| CoreError::Internal(format!("envelope serialization: {e}")))?;
            sqlx::query("INSERT INTO outbox (topic, envelope, created_at) VALUES (?, ?, ?)")
                .bind(TOPIC_TASK_EVENTS)
                .bind(body)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(sqlx_error_to_core_error)?;
        }

        tx.commit().await.map_err(sqlx_error_to_core_error)?;

        Ok(Some(self.hydrate_one(task).await?))
    }

    async fn claim_due_reminders(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<DueReminder>> {
        // The selection and the flip are one statement, so concurrent
        // sweeps never claim the same row.
        let rows = sqlx::query(
            "UPDATE tasks SET reminder_sent = 1, updated_at = ? \
             WHERE id IN (\
                 SELECT id FROM tasks \
                 WHERE remind_at <= ? AND reminder_sent = 0 AND completed = 0 \
                 ORDER BY remind_at ASC LIMIT ?\
             ) \
             RETURNING id, owner_id, title, remind_at, due_at",
        )
        .bind(now)
        .bind(now)
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_core_error)?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        let mut owner_ids: Vec<String> = rows
            .iter()
            .map(|r| r.get::<String, _>("owner_id"))
            .collect();
        owner_ids.sort();
        owner_ids.dedup();

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, email FROM users WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in &owner_ids {
            separated.push_bind(id.clone());
        }
        qb.push(")");

        let user_rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;
        let emails: HashMap<String, String> = user_rows
            .iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<String, _>("email")))
            .collect();

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let owner_raw: String = row.get("owner_id");
            let Some(email) = emails.get(&owner_raw) else {
                tracing::warn!(owner_id = %owner_raw, "Claimed reminder without owner row");
                continue;
            };
            claimed.push(DueReminder {
                task_id: uuid_from_row(row, "id")?,
                owner_id: uuid_from_row(row, "owner_id")?,
                owner_email: email.clone(),
                title: row.get("title"),
                remind_at: row.get("remind_at"),
                due_at: row.get("due_at"),
            });
        }
        Ok(claimed)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_core_error)?;
        Ok(())
    }
}

/// Upsert a tag by (owner, case-folded name) and attach it to the task.
/// Shared by task creation and the tag repository.
pub(crate) async fn upsert_tag_and_attach(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    task_id: Uuid,
    owner: Uuid,
    name: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO tags (id, owner_id, name, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT (owner_id, name) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(owner.to_string())
    .bind(name)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(sqlx_error_to_core_error)?;

    let tag_id: String = sqlx::query("SELECT id FROM tags WHERE owner_id = ? AND name = ?")
        .bind(owner.to_string())
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(sqlx_error_to_core_error)?
        .get("id");

    sqlx::query("INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?, ?)")
        .bind(task_id.to_string())
        .bind(tag_id)
        .execute(&mut **tx)
        .await
        .map_err(sqlx_error_to_core_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause_shapes() {
        assert_eq!(
            order_clause(SortKey::CreatedAt, SortDirection::Asc),
            "created_at ASC, id ASC"
        );
        assert_eq!(
            order_clause(SortKey::DueAt, SortDirection::Asc),
            "due_at IS NULL ASC, due_at ASC, id ASC"
        );
        assert_eq!(
            order_clause(SortKey::DueAt, SortDirection::Desc),
            "due_at IS NULL DESC, due_at DESC, id ASC"
        );
        assert!(order_clause(SortKey::Priority, SortDirection::Desc).contains("CASE priority"));
        assert_eq!(
            order_clause(SortKey::Title, SortDirection::Asc),
            "lower(title) ASC, id ASC"
        );
    }
}

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use task_core::{
    error::{CoreError, Result},
    models::{Conversation, Message, MessageRole, Priority, Recurrence, Task, User},
};
use uuid::Uuid;

/// Parse a TEXT uuid column
pub fn uuid_from_row(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw)
        .map_err(|_| CoreError::Database(format!("Invalid uuid in column '{column}': {raw}")))
}

/// Parse an optional TEXT uuid column
pub fn opt_uuid_from_row(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column);
    match raw {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(&raw).map(Some).map_err(|_| {
            CoreError::Database(format!("Invalid uuid in column '{column}': {raw}"))
        }),
    }
}

pub fn string_to_priority(s: &str) -> Result<Priority> {
    Priority::parse(s)
        .ok_or_else(|| CoreError::Database(format!("Invalid priority in database: {s}")))
}

pub fn string_to_recurrence(s: &str) -> Result<Recurrence> {
    Recurrence::parse(s)
        .ok_or_else(|| CoreError::Database(format!("Invalid recurrence in database: {s}")))
}

pub fn string_to_role(s: &str) -> Result<MessageRole> {
    MessageRole::parse(s)
        .ok_or_else(|| CoreError::Database(format!("Invalid message role in database: {s}")))
}

/// Convert a SQLite row to a Task. Tags are hydrated separately by the
/// caller; the row itself carries none.
pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let priority: String = row.get("priority");
    let recurrence: String = row.get("recurrence");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Task {
        id: uuid_from_row(row, "id")?,
        owner_id: uuid_from_row(row, "owner_id")?,
        title: row.get("title"),
        description: row.get("description"),
        completed: row.get("completed"),
        priority: string_to_priority(&priority)?,
        due_at: row.get("due_at"),
        remind_at: row.get("remind_at"),
        reminder_sent: row.get("reminder_sent"),
        recurrence: string_to_recurrence(&recurrence)?,
        parent_task_id: opt_uuid_from_row(row, "parent_task_id")?,
        tags: vec![],
        created_at,
        updated_at,
    })
}

/// Columns selected for every task query
pub const TASK_COLUMNS: &str = "id, owner_id, title, description, completed, priority, \
     due_at, remind_at, reminder_sent, recurrence, parent_task_id, created_at, updated_at";

pub fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: uuid_from_row(row, "id")?,
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: uuid_from_row(row, "id")?,
        owner_id: uuid_from_row(row, "owner_id")?,
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    Ok(Message {
        id: uuid_from_row(row, "id")?,
        conversation_id: uuid_from_row(row, "conversation_id")?,
        role: string_to_role(&role)?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

/// Convert a sqlx error to a CoreError.
///
/// Uniqueness violations and lock contention surface as Conflict so the
/// service layer can retry or report; everything else is a retryable store
/// failure.
pub fn sqlx_error_to_core_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            let message = db_err.message();

            if code == "2067" || message.contains("UNIQUE constraint failed") {
                if message.contains("users.") || message.contains("idx_users_email_folded") {
                    return CoreError::Conflict("email already registered".to_string());
                }
                return CoreError::Conflict(format!("uniqueness violation: {message}"));
            }
            if code == "5" || code == "6" || message.contains("database is locked") {
                return CoreError::Conflict("store contention".to_string());
            }
            CoreError::Database(format!("Database constraint error: {message}"))
        }
        sqlx::Error::PoolTimedOut => CoreError::Database("connection pool exhausted".to_string()),
        _ => CoreError::Database(format!("Database error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_converters_reject_garbage() {
        assert!(string_to_priority("medium").is_ok());
        assert!(string_to_priority("urgent").is_err());
        assert!(string_to_recurrence("weekly").is_ok());
        assert!(string_to_recurrence("fortnightly").is_err());
        assert!(string_to_role("assistant").is_ok());
        assert!(string_to_role("system").is_err());
    }
}

use async_trait::async_trait;
use chrono::{Duration, Utc};
use task_core::{
    error::Result,
    models::{Conversation, Message, MessageRole},
    repository::ConversationRepository,
};
use uuid::Uuid;

use crate::common::{row_to_conversation, row_to_message, sqlx_error_to_core_error};
use crate::sqlite::SqliteStore;

const CONVERSATION_COLUMNS: &str = "id, owner_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, created_at";

#[async_trait]
impl ConversationRepository for SqliteStore {
    async fn create_conversation(&self, owner: Uuid, title: Option<String>) -> Result<Conversation> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO conversations (id, owner_id, title, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .bind(&title)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        Ok(Conversation { id, owner_id: owner, title, created_at: now, updated_at: now })
    }

    async fn get_conversation(&self, id: Uuid, owner: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ? AND owner_id = ?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE owner_id = ? \
             ORDER BY updated_at DESC, id ASC"
        ))
        .bind(owner.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn delete_conversation(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        // messages cascade via foreign key
        let result = sqlx::query("DELETE FROM conversations WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(self.pool())
            .await
            .map_err(sqlx_error_to_core_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_title_if_empty(
        &self,
        id: Uuid,
        owner: Uuid,
        title: &str,
    ) -> Result<Option<Conversation>> {
        sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? \
             WHERE id = ? AND owner_id = ? AND title IS NULL",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(owner.to_string())
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        self.get_conversation(id, owner).await
    }

    async fn messages(&self, conversation_id: Uuid, owner: Uuid) -> Result<Option<Vec<Message>>> {
        if self.get_conversation(conversation_id, owner).await?.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        Ok(Some(rows.iter().map(row_to_message).collect::<Result<_>>()?))
    }

    async fn append_turn(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<Option<(Message, Message)>> {
        let mut tx = self.pool().begin().await.map_err(sqlx_error_to_core_error)?;

        let owned = sqlx::query("SELECT 1 FROM conversations WHERE id = ? AND owner_id = ?")
            .bind(conversation_id.to_string())
            .bind(owner.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_core_error)?;
        if owned.is_none() {
            return Ok(None);
        }

        let now = Utc::now();
        // the assistant timestamp is nudged after the user's so transcript
        // order stays stable under the created-at-then-id ordering
        let assistant_at = now + Duration::milliseconds(1);

        let user_message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role: MessageRole::User,
            content: user_content.to_string(),
            created_at: now,
        };
        let assistant_message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role: MessageRole::Assistant,
            content: assistant_content.to_string(),
            created_at: assistant_at,
        };

        for message in [&user_message, &assistant_message] {
            sqlx::query(
                "INSERT INTO messages (id, conversation_id, role, content, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(message.id.to_string())
            .bind(conversation_id.to_string())
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_core_error)?;
        }

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(assistant_at)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_core_error)?;

        tx.commit().await.map_err(sqlx_error_to_core_error)?;
        Ok(Some((user_message, assistant_message)))
    }
}

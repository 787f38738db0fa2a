use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::Result,
    events::OutboxEntry,
    models::{
        Conversation, DueReminder, Message, NewTask, NewUser, ProfileChanges, Tag, Task,
        TaskChanges, TaskFilter, User,
    },
};

/// Persistence of identity principals.
///
/// Implementations must be thread-safe and support concurrent access; email
/// lookups are case-insensitive.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user.
    ///
    /// # Returns
    /// * `Ok(User)` - The created user with assigned id and timestamps
    /// * `Err(CoreError::Conflict)` - If the email is already registered
    /// * `Err(CoreError::Database)` - If the store operation fails
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Fetch a user by id; `Ok(None)` when absent.
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Fetch a user by email, compared case-insensitively.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Apply profile changes; `Ok(None)` when the user does not exist.
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<Option<User>>;
}

/// Persistence of tasks, the authoritative state of the platform.
///
/// Every accessor is owner-scoped: a task owned by someone else behaves
/// exactly like a missing task. All mutations to one task serialize through
/// the store's row-level transaction boundary.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task; tag names are upserted case-folded and associated as
    /// a set.
    async fn create(&self, task: NewTask) -> Result<Task>;

    /// Fetch one task. `Ok(None)` when missing or owned by another user.
    async fn get(&self, id: Uuid, owner: Uuid) -> Result<Option<Task>>;

    /// List tasks matching the filter, ordered by its sort key. `now` is the
    /// instant used by the `overdue` predicate.
    async fn list(&self, owner: Uuid, filter: &TaskFilter, now: DateTime<Utc>)
        -> Result<Vec<Task>>;

    /// Case-insensitive substring search over title and description,
    /// ordered by creation time descending.
    async fn search(&self, owner: Uuid, query: &str) -> Result<Vec<Task>>;

    /// Apply partial changes. Clearing or re-setting `remind_at` resets
    /// `reminder_sent`. `Ok(None)` when the task is not visible to `owner`.
    async fn update(&self, id: Uuid, owner: Uuid, changes: TaskChanges) -> Result<Option<Task>>;

    /// Delete a task, cascading its tag associations but not its
    /// successors. Returns whether a row was deleted.
    async fn delete(&self, id: Uuid, owner: Uuid) -> Result<bool>;

    /// Atomically flip the completion flag. On the false-to-true transition
    /// the matching `task.completed` outbox record is committed in the same
    /// transaction; true-to-false enqueues nothing.
    async fn toggle_completed(
        &self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>>;

    /// Claim up to `batch` matured reminders: flip `reminder_sent` and
    /// return the claimed rows joined with the owner's email. The flip and
    /// the selection are one atomic statement, so two concurrent sweeps
    /// never claim the same row.
    async fn claim_due_reminders(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<DueReminder>>;

    /// Store reachability probe for monitoring.
    async fn health_check(&self) -> Result<()>;
}

/// Persistence of per-user tags and their task associations.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// List a user's tags, ordered by name.
    async fn list_tags(&self, owner: Uuid) -> Result<Vec<Tag>>;

    /// Associate a tag (upserted by case-folded name) with a task.
    /// Idempotent; `Ok(None)` when the task is not visible to `owner`.
    async fn attach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>>;

    /// Remove a tag association. Removing an absent association is a no-op,
    /// not an error. `Ok(None)` when the task is not visible to `owner`.
    async fn detach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>>;

    /// Delete a tag, cascading only its associations. Returns whether a tag
    /// row was deleted.
    async fn delete_tag(&self, owner: Uuid, name: &str) -> Result<bool>;
}

/// Persistence of chat sessions and their ordered transcripts.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_conversation(&self, owner: Uuid, title: Option<String>) -> Result<Conversation>;

    /// `Ok(None)` when missing or owned by another user.
    async fn get_conversation(&self, id: Uuid, owner: Uuid) -> Result<Option<Conversation>>;

    /// List a user's conversations, most recently updated first.
    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>>;

    /// Delete a conversation and its messages. Returns whether a row was
    /// deleted.
    async fn delete_conversation(&self, id: Uuid, owner: Uuid) -> Result<bool>;

    /// Set the title only when none is set yet; returns the conversation
    /// either way. `Ok(None)` when not visible to `owner`.
    async fn set_title_if_empty(
        &self,
        id: Uuid,
        owner: Uuid,
        title: &str,
    ) -> Result<Option<Conversation>>;

    /// Messages of a conversation ordered by creation time, ties broken by
    /// id. `Ok(None)` when the conversation is not visible to `owner`.
    async fn messages(&self, conversation_id: Uuid, owner: Uuid) -> Result<Option<Vec<Message>>>;

    /// Commit the user message and the assistant reply of one turn in a
    /// single transaction, bumping the conversation's updated time.
    async fn append_turn(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<Option<(Message, Message)>>;
}

/// Per-consumer persistent set of handled event ids; the idempotency
/// backstop against bus redelivery.
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Whether this consumer has already handled the event.
    async fn is_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool>;

    /// Record the event as handled. Returns `false` when it was already
    /// present (a concurrent or earlier delivery won).
    async fn mark_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool>;
}

/// Outbox drain surface. Entries are enqueued inside the state-changing
/// transactions of [`TaskRepository`]; a separate publisher moves them to
/// the bus.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Oldest unpublished entries, up to `limit`.
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>>;

    /// Stamp entries as published.
    async fn mark_published(&self, ids: &[i64], at: DateTime<Utc>) -> Result<()>;

    /// Remove published entries older than the retention horizon; returns
    /// the number pruned.
    async fn prune_published(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

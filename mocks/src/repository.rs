//! In-memory implementation of every repository trait
//!
//! Provides a thread-safe store with:
//! - Error injection capabilities
//! - Call tracking for verification
//! - The same visible semantics as the SQLite store

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use task_core::{
    error::{CoreError, Result},
    events::{EventEnvelope, OutboxEntry, TOPIC_TASK_EVENTS},
    models::{
        Conversation, DueReminder, Message, MessageRole, NewTask, NewUser, ProfileChanges,
        SortDirection, SortKey, Tag, Task, TaskChanges, TaskFilter, User,
    },
    repository::{
        ConversationRepository, OutboxRepository, ProcessedEventRepository, TagRepository,
        TaskRepository, UserRepository,
    },
};
use uuid::Uuid;

/// In-memory store for tests, mirroring the SQLite store's semantics.
///
/// Features:
/// - Thread-safe concurrent access
/// - Error injection for failure testing
/// - Call history tracking for verification
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    tasks: Mutex<HashMap<Uuid, Task>>,
    tags: Mutex<HashMap<Uuid, Tag>>,
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    messages: Mutex<Vec<Message>>,
    processed: Mutex<HashSet<(String, Uuid)>>,
    outbox: Mutex<Vec<OutboxEntry>>,
    next_outbox_id: Mutex<i64>,
    error_injection: Mutex<Option<CoreError>>,
    call_history: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inject an error returned by the next repository call
    pub fn inject_error(&self, error: CoreError) {
        *self.error_injection.lock() = Some(error);
    }

    /// Recorded repository call names, in order
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    /// Unpublished and published outbox entries, oldest first
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.outbox.lock().clone()
    }

    fn record_call(&self, name: &str) -> Result<()> {
        self.call_history.lock().push(name.to_string());
        if let Some(error) = self.error_injection.lock().take() {
            return Err(error);
        }
        Ok(())
    }

    fn sorted_tags(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        self.record_call("create_user")?;
        let mut users = self.users.lock();
        if users
            .values()
            .any(|u| u.email.to_lowercase() == user.email.to_lowercase())
        {
            return Err(CoreError::Conflict("email already registered".to_string()));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.record_call("get_user_by_id")?;
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.record_call("get_user_by_email")?;
        let folded = email.trim().to_lowercase();
        Ok(self
            .users
            .lock()
            .values()
            .find(|u| u.email.to_lowercase() == folded)
            .cloned())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<Option<User>> {
        self.record_call("update_profile")?;
        let mut users = self.users.lock();
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            user.email = email.trim().to_string();
        }
        if let Some(display_name) = changes.display_name {
            user.display_name = display_name.trim().to_string();
        }
        if let Some(avatar_url) = changes.avatar_url {
            user.avatar_url = avatar_url;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn create(&self, new_task: NewTask) -> Result<Task> {
        self.record_call("create")?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            owner_id: new_task.owner_id,
            title: new_task.title,
            description: new_task.description,
            completed: false,
            priority: new_task.priority,
            due_at: new_task.due_at,
            remind_at: new_task.remind_at,
            reminder_sent: false,
            recurrence: new_task.recurrence,
            parent_task_id: new_task.parent_task_id,
            tags: Self::sorted_tags(new_task.tags),
            created_at: now,
            updated_at: now,
        };
        for name in &task.tags {
            self.ensure_tag(task.owner_id, name);
        }
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid, owner: Uuid) -> Result<Option<Task>> {
        self.record_call("get")?;
        Ok(self
            .tasks
            .lock()
            .get(&id)
            .filter(|t| t.owner_id == owner)
            .cloned())
    }

    async fn list(
        &self,
        owner: Uuid,
        filter: &TaskFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        self.record_call("list")?;
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.owner_id == owner)
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .filter(|t| filter.completed.map_or(true, |c| t.completed == c))
            .filter(|t| !filter.overdue || t.is_overdue(now))
            .filter(|t| {
                filter
                    .tag
                    .as_ref()
                    .map_or(true, |tag| t.tags.iter().any(|n| n == tag))
            })
            .cloned()
            .collect();

        tasks.sort_by(|a, b| {
            let ordering = match filter.sort {
                SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
                SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortKey::Priority => a.priority.rank().cmp(&b.priority.rank()),
                SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
                SortKey::DueAt => match (a.due_at, b.due_at) {
                    // nulls last ascending; the direction flip below then
                    // puts them first descending
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (Some(a), Some(b)) => a.cmp(&b),
                },
            };
            let ordering = match filter.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            ordering.then(a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    async fn search(&self, owner: Uuid, query: &str) -> Result<Vec<Task>> {
        self.record_call("search")?;
        let folded = query.to_lowercase();
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.owner_id == owner)
            .filter(|t| {
                t.title.to_lowercase().contains(&folded)
                    || t.description
                        .as_deref()
                        .map_or(false, |d| d.to_lowercase().contains(&folded))
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn update(&self, id: Uuid, owner: Uuid, changes: TaskChanges) -> Result<Option<Task>> {
        self.record_call("update")?;
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(&id).filter(|t| t.owner_id == owner) else {
            return Ok(None);
        };
        if let Some(title) = changes.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = changes.description {
            task.description = description;
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(due_at) = changes.due_at {
            task.due_at = due_at;
        }
        if let Some(remind_at) = changes.remind_at {
            task.remind_at = remind_at;
            task.reminder_sent = false;
        }
        if let Some(recurrence) = changes.recurrence {
            task.recurrence = recurrence;
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        self.record_call("delete")?;
        let mut tasks = self.tasks.lock();
        let owned = tasks.get(&id).is_some_and(|t| t.owner_id == owner);
        if owned {
            tasks.remove(&id);
            // successors keep existing; their parent pointer dangles like a
            // SET NULL foreign key
            for task in tasks.values_mut() {
                if task.parent_task_id == Some(id) {
                    task.parent_task_id = None;
                }
            }
        }
        Ok(owned)
    }

    async fn toggle_completed(
        &self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        self.record_call("toggle_completed")?;
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(&id).filter(|t| t.owner_id == owner) else {
            return Ok(None);
        };
        task.completed = !task.completed;
        task.updated_at = now;
        let task = task.clone();
        drop(tasks);

        if task.completed {
            let envelope = EventEnvelope::task_completed(&task, now);
            let mut next_id = self.next_outbox_id.lock();
            *next_id += 1;
            self.outbox.lock().push(OutboxEntry {
                id: *next_id,
                topic: TOPIC_TASK_EVENTS.to_string(),
                envelope,
                created_at: now,
                published_at: None,
            });
        }
        Ok(Some(task))
    }

    async fn claim_due_reminders(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<DueReminder>> {
        self.record_call("claim_due_reminders")?;
        let users = self.users.lock();
        let mut tasks = self.tasks.lock();

        let mut due: Vec<Uuid> = tasks
            .values()
            .filter(|t| t.reminder_pending(now))
            .map(|t| t.id)
            .collect();
        due.sort_by_key(|id| tasks[id].remind_at);
        due.truncate(batch as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let task = tasks.get_mut(&id).expect("listed above");
            task.reminder_sent = true;
            task.updated_at = now;
            let Some(owner) = users.get(&task.owner_id) else {
                continue;
            };
            claimed.push(DueReminder {
                task_id: task.id,
                owner_id: task.owner_id,
                owner_email: owner.email.clone(),
                title: task.title.clone(),
                remind_at: task.remind_at.expect("pending reminders have remind_at"),
                due_at: task.due_at,
            });
        }
        Ok(claimed)
    }

    async fn health_check(&self) -> Result<()> {
        self.record_call("health_check")
    }
}

impl InMemoryStore {
    fn ensure_tag(&self, owner: Uuid, name: &str) {
        let mut tags = self.tags.lock();
        let exists = tags
            .values()
            .any(|t| t.owner_id == owner && t.name == name);
        if !exists {
            let tag = Tag {
                id: Uuid::new_v4(),
                owner_id: owner,
                name: name.to_string(),
                created_at: Utc::now(),
            };
            tags.insert(tag.id, tag);
        }
    }
}

#[async_trait]
impl TagRepository for InMemoryStore {
    async fn list_tags(&self, owner: Uuid) -> Result<Vec<Tag>> {
        self.record_call("list_tags")?;
        let mut tags: Vec<Tag> = self
            .tags
            .lock()
            .values()
            .filter(|t| t.owner_id == owner)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn attach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
        self.record_call("attach_tag")?;
        self.ensure_tag(owner, name);
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(&task_id).filter(|t| t.owner_id == owner) else {
            return Ok(None);
        };
        if !task.tags.iter().any(|n| n == name) {
            task.tags.push(name.to_string());
            task.tags.sort();
        }
        Ok(Some(task.clone()))
    }

    async fn detach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
        self.record_call("detach_tag")?;
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(&task_id).filter(|t| t.owner_id == owner) else {
            return Ok(None);
        };
        task.tags.retain(|n| n != name);
        Ok(Some(task.clone()))
    }

    async fn delete_tag(&self, owner: Uuid, name: &str) -> Result<bool> {
        self.record_call("delete_tag")?;
        let mut tags = self.tags.lock();
        let Some(id) = tags
            .values()
            .find(|t| t.owner_id == owner && t.name == name)
            .map(|t| t.id)
        else {
            return Ok(false);
        };
        tags.remove(&id);
        for task in self.tasks.lock().values_mut() {
            if task.owner_id == owner {
                task.tags.retain(|n| n != name);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn create_conversation(
        &self,
        owner: Uuid,
        title: Option<String>,
    ) -> Result<Conversation> {
        self.record_call("create_conversation")?;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            owner_id: owner,
            title,
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .lock()
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid, owner: Uuid) -> Result<Option<Conversation>> {
        self.record_call("get_conversation")?;
        Ok(self
            .conversations
            .lock()
            .get(&id)
            .filter(|c| c.owner_id == owner)
            .cloned())
    }

    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>> {
        self.record_call("list_conversations")?;
        let mut conversations: Vec<Conversation> = self
            .conversations
            .lock()
            .values()
            .filter(|c| c.owner_id == owner)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(conversations)
    }

    async fn delete_conversation(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        self.record_call("delete_conversation")?;
        let mut conversations = self.conversations.lock();
        let owned = conversations
            .get(&id)
            .is_some_and(|c| c.owner_id == owner);
        if owned {
            conversations.remove(&id);
            self.messages.lock().retain(|m| m.conversation_id != id);
        }
        Ok(owned)
    }

    async fn set_title_if_empty(
        &self,
        id: Uuid,
        owner: Uuid,
        title: &str,
    ) -> Result<Option<Conversation>> {
        self.record_call("set_title_if_empty")?;
        let mut conversations = self.conversations.lock();
        let Some(conversation) = conversations.get_mut(&id).filter(|c| c.owner_id == owner)
        else {
            return Ok(None);
        };
        if conversation.title.is_none() {
            conversation.title = Some(title.to_string());
            conversation.updated_at = Utc::now();
        }
        Ok(Some(conversation.clone()))
    }

    async fn messages(&self, conversation_id: Uuid, owner: Uuid) -> Result<Option<Vec<Message>>> {
        self.record_call("messages")?;
        let owned = self
            .conversations
            .lock()
            .get(&conversation_id)
            .is_some_and(|c| c.owner_id == owner);
        if !owned {
            return Ok(None);
        }
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(Some(messages))
    }

    async fn append_turn(
        &self,
        conversation_id: Uuid,
        owner: Uuid,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<Option<(Message, Message)>> {
        self.record_call("append_turn")?;
        let mut conversations = self.conversations.lock();
        let Some(conversation) = conversations
            .get_mut(&conversation_id)
            .filter(|c| c.owner_id == owner)
        else {
            return Ok(None);
        };

        let now = Utc::now();
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
        let mut messages = self.messages.lock();
        messages.push(user_message.clone());
        messages.push(assistant_message.clone());
        conversation.updated_at = assistant_at;
        Ok(Some((user_message, assistant_message)))
    }
}

#[async_trait]
impl ProcessedEventRepository for InMemoryStore {
    async fn is_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        self.record_call("is_processed")?;
        Ok(self
            .processed
            .lock()
            .contains(&(consumer.to_string(), event_id)))
    }

    async fn mark_processed(&self, consumer: &str, event_id: Uuid) -> Result<bool> {
        self.record_call("mark_processed")?;
        Ok(self.processed.lock().insert((consumer.to_string(), event_id)))
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        self.record_call("pending")?;
        Ok(self
            .outbox
            .lock()
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[i64], at: DateTime<Utc>) -> Result<()> {
        self.record_call("mark_published")?;
        for entry in self.outbox.lock().iter_mut() {
            if ids.contains(&entry.id) {
                entry.published_at = Some(at);
            }
        }
        Ok(())
    }

    async fn prune_published(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.record_call("prune_published")?;
        let mut outbox = self.outbox.lock();
        let before = outbox.len();
        outbox.retain(|e| e.published_at.map_or(true, |at| at >= older_than));
        Ok((before - outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_injection_fires_once() {
        let store = InMemoryStore::new();
        store.inject_error(CoreError::Database("boom".to_string()));

        let owner = Uuid::new_v4();
        let result = TaskRepository::create(store.as_ref(), NewTask::new(owner, "x")).await;
        assert!(matches!(result, Err(CoreError::Database(_))));

        // next call succeeds again
        assert!(TaskRepository::create(store.as_ref(), NewTask::new(owner, "x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_call_history_records_order() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let task = TaskRepository::create(store.as_ref(), NewTask::new(owner, "x"))
            .await
            .unwrap();
        store.get(task.id, owner).await.unwrap();

        assert_eq!(store.call_history(), vec!["create", "get"]);
    }

    #[tokio::test]
    async fn test_toggle_records_outbox_entry() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let task = TaskRepository::create(store.as_ref(), NewTask::new(owner, "x"))
            .await
            .unwrap();
        store
            .toggle_completed(task.id, owner, Utc::now())
            .await
            .unwrap();

        let entries = store.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic, TOPIC_TASK_EVENTS);
    }
}

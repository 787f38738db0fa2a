use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{NewTask, Tag, Task, TaskChanges, TaskFilter},
    repository::{TagRepository, TaskRepository},
    validation::Validator,
};

// Bounded retries on store contention before surfacing Conflict
const MAX_ATTEMPTS: u8 = 3;

/// Sole authority for task state.
///
/// All mutations flow through this service; workers re-enter it with a
/// service principal instead of writing to the store directly. Every
/// operation is scoped to a resolved owner id; a task owned by someone
/// else is indistinguishable from a missing one.
#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    tags: Arc<dyn TagRepository>,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskRepository>, tags: Arc<dyn TagRepository>) -> Self {
        Self { tasks, tags }
    }

    /// Create a task for `owner`. Tag names are case-folded and collapse to
    /// a set; the reminder, when given, must be strictly in the future.
    pub async fn create_task(&self, owner: Uuid, mut new_task: NewTask) -> Result<Task> {
        Validator::validate_title(&new_task.title)?;
        if let Some(description) = &new_task.description {
            Validator::validate_description(description)?;
        }
        if let Some(remind_at) = new_task.remind_at {
            Validator::validate_remind_at(remind_at, Utc::now())?;
        }

        let mut folded: Vec<String> = Vec::with_capacity(new_task.tags.len());
        for name in &new_task.tags {
            Validator::validate_tag_name(name)?;
            let name = Validator::fold_tag_name(name);
            if !folded.contains(&name) {
                folded.push(name);
            }
        }

        new_task.owner_id = owner;
        new_task.title = new_task.title.trim().to_string();
        new_task.tags = folded;

        let task = self.tasks.create(new_task).await?;
        tracing::info!(task_id = %task.id, owner_id = %owner, "Task created");
        Ok(task)
    }

    /// Fetch one task; missing and foreign-owned collapse to NotFound.
    pub async fn get_task(&self, owner: Uuid, id: Uuid) -> Result<Task> {
        self.tasks
            .get(id, owner)
            .await?
            .ok_or_else(CoreError::task_not_found)
    }

    /// List tasks matching `filter`, stably ordered by its sort key.
    pub async fn list_tasks(&self, owner: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut filter = filter.clone();
        if let Some(tag) = &filter.tag {
            filter.tag = Some(Validator::fold_tag_name(tag));
        }
        self.tasks.list(owner, &filter, Utc::now()).await
    }

    /// Case-insensitive substring search over title and description,
    /// newest first.
    pub async fn search_tasks(&self, owner: Uuid, query: &str) -> Result<Vec<Task>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CoreError::empty_field("query"));
        }
        self.tasks.search(owner, query).await
    }

    /// Apply a partial update, re-validating changed fields. Changes that
    /// merely restate the task's current values are dropped, so an update
    /// with the current values is a true no-op: no write, no new timestamp.
    pub async fn update_task(&self, owner: Uuid, id: Uuid, changes: TaskChanges) -> Result<Task> {
        if let Some(title) = &changes.title {
            Validator::validate_title(title)?;
        }
        if let Some(Some(description)) = &changes.description {
            Validator::validate_description(description)?;
        }
        if let Some(Some(remind_at)) = changes.remind_at {
            Validator::validate_remind_at(remind_at, Utc::now())?;
        }

        let current = self.get_task(owner, id).await?;
        let changes = normalize_changes(changes, &current);
        if changes.is_empty() {
            return Ok(current);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tasks.update(id, owner, changes.clone()).await {
                Ok(Some(task)) => return Ok(task),
                Ok(None) => return Err(CoreError::task_not_found()),
                Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(task_id = %id, attempt, "Retrying contended update");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete a task. Successor tasks are independent work items and are
    /// not cascaded.
    pub async fn delete_task(&self, owner: Uuid, id: Uuid) -> Result<()> {
        if !self.tasks.delete(id, owner).await? {
            return Err(CoreError::task_not_found());
        }
        tracing::info!(task_id = %id, owner_id = %owner, "Task deleted");
        Ok(())
    }

    /// Atomically flip the completion flag. The false-to-true transition
    /// commits a `task.completed` outbox record in the same transaction;
    /// the reverse transition publishes nothing.
    pub async fn toggle_complete(&self, owner: Uuid, id: Uuid) -> Result<Task> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tasks.toggle_completed(id, owner, Utc::now()).await {
                Ok(Some(task)) => {
                    tracing::info!(
                        task_id = %task.id,
                        completed = task.completed,
                        "Task completion toggled"
                    );
                    return Ok(task);
                }
                Ok(None) => return Err(CoreError::task_not_found()),
                Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(task_id = %id, attempt, "Retrying contended toggle");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Associate a tag with a task; idempotent set semantics.
    pub async fn add_tag(&self, owner: Uuid, id: Uuid, name: &str) -> Result<Task> {
        Validator::validate_tag_name(name)?;
        let folded = Validator::fold_tag_name(name);
        self.tags
            .attach_tag(id, owner, &folded)
            .await?
            .ok_or_else(CoreError::task_not_found)
    }

    /// Remove a tag association; removing an absent tag is a no-op.
    pub async fn remove_tag(&self, owner: Uuid, id: Uuid, name: &str) -> Result<Task> {
        Validator::validate_tag_name(name)?;
        let folded = Validator::fold_tag_name(name);
        self.tags
            .detach_tag(id, owner, &folded)
            .await?
            .ok_or_else(CoreError::task_not_found)
    }

    /// List the owner's tags.
    pub async fn list_tags(&self, owner: Uuid) -> Result<Vec<Tag>> {
        self.tags.list_tags(owner).await
    }

    /// Delete a tag, cascading only its associations.
    pub async fn delete_tag(&self, owner: Uuid, name: &str) -> Result<()> {
        let folded = Validator::fold_tag_name(name);
        if !self.tags.delete_tag(owner, &folded).await? {
            return Err(CoreError::tag_not_found());
        }
        Ok(())
    }

    /// Schedule a reminder strictly in the future; resets the sent marker
    /// so the scheduler picks it up on a later sweep.
    pub async fn set_reminder(
        &self,
        owner: Uuid,
        id: Uuid,
        remind_at: chrono::DateTime<Utc>,
    ) -> Result<Task> {
        Validator::validate_remind_at(remind_at, Utc::now())?;
        let changes = TaskChanges {
            remind_at: Some(Some(remind_at)),
            ..Default::default()
        };
        self.tasks
            .update(id, owner, changes)
            .await?
            .ok_or_else(CoreError::task_not_found)
    }

    /// Store reachability probe.
    pub async fn health_check(&self) -> Result<()> {
        self.tasks.health_check().await
    }
}

/// Drop change fields that restate the task's current values. Re-setting
/// an identical reminder is kept whenever the sent marker needs resetting.
fn normalize_changes(mut changes: TaskChanges, current: &Task) -> TaskChanges {
    if changes.title.as_deref().map(str::trim) == Some(current.title.as_str()) {
        changes.title = None;
    }
    if changes.description.as_ref() == Some(&current.description) {
        changes.description = None;
    }
    if changes.priority == Some(current.priority) {
        changes.priority = None;
    }
    if changes.due_at == Some(current.due_at) {
        changes.due_at = None;
    }
    if changes.remind_at == Some(current.remind_at) && !current.reminder_sent {
        changes.remind_at = None;
    }
    if changes.recurrence == Some(current.recurrence) {
        changes.recurrence = None;
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DueReminder, Priority};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal in-memory double; only what these tests exercise is
    /// implemented.
    #[derive(Default)]
    struct StubStore {
        tasks: Mutex<HashMap<Uuid, Task>>,
    }

    #[async_trait]
    impl TaskRepository for StubStore {
        async fn create(&self, new_task: NewTask) -> Result<Task> {
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
                tags: new_task.tags,
                created_at: now,
                updated_at: now,
            };
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(task)
        }

        async fn get(&self, id: Uuid, owner: Uuid) -> Result<Option<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .get(&id)
                .filter(|t| t.owner_id == owner)
                .cloned())
        }

        async fn list(
            &self,
            _owner: Uuid,
            _filter: &TaskFilter,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Task>> {
            unimplemented!("not exercised here")
        }

        async fn search(&self, _owner: Uuid, _query: &str) -> Result<Vec<Task>> {
            unimplemented!("not exercised here")
        }

        async fn update(
            &self,
            id: Uuid,
            owner: Uuid,
            changes: TaskChanges,
        ) -> Result<Option<Task>> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&id).filter(|t| t.owner_id == owner) else {
                return Ok(None);
            };
            if let Some(title) = changes.title {
                task.title = title;
            }
            if let Some(remind_at) = changes.remind_at {
                task.remind_at = remind_at;
                task.reminder_sent = false;
            }
            Ok(Some(task.clone()))
        }

        async fn delete(&self, id: Uuid, owner: Uuid) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get(&id) {
                Some(t) if t.owner_id == owner => {
                    tasks.remove(&id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn toggle_completed(
            &self,
            id: Uuid,
            owner: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Option<Task>> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&id).filter(|t| t.owner_id == owner) else {
                return Ok(None);
            };
            task.completed = !task.completed;
            task.updated_at = now;
            Ok(Some(task.clone()))
        }

        async fn claim_due_reminders(
            &self,
            _now: DateTime<Utc>,
            _batch: u32,
        ) -> Result<Vec<DueReminder>> {
            unimplemented!("not exercised here")
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TagRepository for StubStore {
        async fn list_tags(&self, _owner: Uuid) -> Result<Vec<Tag>> {
            unimplemented!("not exercised here")
        }

        async fn attach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&task_id).filter(|t| t.owner_id == owner) else {
                return Ok(None);
            };
            if !task.tags.iter().any(|t| t == name) {
                task.tags.push(name.to_string());
            }
            Ok(Some(task.clone()))
        }

        async fn detach_tag(&self, task_id: Uuid, owner: Uuid, name: &str) -> Result<Option<Task>> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(&task_id).filter(|t| t.owner_id == owner) else {
                return Ok(None);
            };
            task.tags.retain(|t| t != name);
            Ok(Some(task.clone()))
        }

        async fn delete_tag(&self, _owner: Uuid, _name: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn service() -> (TaskService, Arc<StubStore>) {
        let store = Arc::new(StubStore::default());
        (TaskService::new(store.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let result = service.create_task(owner, NewTask::new(owner, "   ")).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_past_reminder() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let mut new_task = NewTask::new(owner, "water plants");
        new_task.remind_at = Some(Utc::now() - Duration::minutes(1));
        let result = service.create_task(owner, new_task).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_folds_and_dedupes_tags() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let mut new_task = NewTask::new(owner, "buy milk");
        new_task.tags = vec!["Home".to_string(), "home".to_string(), "HOME ".to_string()];
        let task = service.create_task(owner, new_task).await.unwrap();
        assert_eq!(task.tags, vec!["home".to_string()]);
    }

    #[tokio::test]
    async fn test_create_overrides_owner_from_principal() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let smuggled = NewTask::new(Uuid::new_v4(), "buy milk");
        let task = service.create_task(owner, smuggled).await.unwrap();
        assert_eq!(task.owner_id, owner);
    }

    #[tokio::test]
    async fn test_cross_owner_get_is_not_found() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let task = service
            .create_task(owner, NewTask::new(owner, "private"))
            .await
            .unwrap();

        let other = Uuid::new_v4();
        assert_eq!(
            service.get_task(other, task.id).await,
            Err(CoreError::task_not_found())
        );
        assert_eq!(
            service.delete_task(other, task.id).await,
            Err(CoreError::task_not_found())
        );
        // and the task is still there for its owner
        assert!(service.get_task(owner, task.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_update_is_a_read() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let task = service
            .create_task(owner, NewTask::new(owner, "unchanged"))
            .await
            .unwrap();
        let same = service
            .update_task(owner, task.id, TaskChanges::default())
            .await
            .unwrap();
        assert_eq!(task, same);
    }

    #[tokio::test]
    async fn test_update_restating_current_values_is_a_no_op() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let task = service
            .create_task(owner, NewTask::new(owner, "steady"))
            .await
            .unwrap();

        let changes = TaskChanges {
            title: Some("steady".to_string()),
            description: Some(None),
            priority: Some(task.priority),
            due_at: Some(None),
            recurrence: Some(task.recurrence),
            ..Default::default()
        };
        let same = service.update_task(owner, task.id, changes).await.unwrap();
        assert_eq!(task, same);
    }

    #[tokio::test]
    async fn test_set_reminder_requires_future() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let task = service
            .create_task(owner, NewTask::new(owner, "call dentist"))
            .await
            .unwrap();

        let past = Utc::now() - Duration::seconds(5);
        assert!(service.set_reminder(owner, task.id, past).await.is_err());

        let future = Utc::now() + Duration::minutes(10);
        let updated = service.set_reminder(owner, task.id, future).await.unwrap();
        assert_eq!(updated.remind_at, Some(future));
        assert!(!updated.reminder_sent);
    }

    #[tokio::test]
    async fn test_tag_ops_are_idempotent() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let task = service
            .create_task(owner, NewTask::new(owner, "tidy desk"))
            .await
            .unwrap();

        let after_first = service.add_tag(owner, task.id, "Office").await.unwrap();
        let after_second = service.add_tag(owner, task.id, "office").await.unwrap();
        assert_eq!(after_first.tags, after_second.tags);
        assert_eq!(after_second.tags, vec!["office".to_string()]);

        // removing an absent tag is a no-op, not an error
        let after_remove = service.remove_tag(owner, task.id, "missing").await.unwrap();
        assert_eq!(after_remove.tags, vec!["office".to_string()]);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        assert!(matches!(
            service.search_tasks(owner, "   ").await,
            Err(CoreError::Validation(_))
        ));
    }
}

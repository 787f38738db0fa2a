//! Builder pattern implementations for easy test data construction

use chrono::{DateTime, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use task_core::models::{NewTask, NewUser, Priority, Recurrence, Task};
use uuid::Uuid;

/// Builder for constructing Task instances in tests
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    /// Create new builder with default values
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                title: "Test task".to_string(),
                description: None,
                completed: false,
                priority: Priority::Medium,
                due_at: None,
                remind_at: None,
                reminder_sent: false,
                recurrence: Recurrence::None,
                parent_task_id: None,
                tags: vec![],
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Builder with a randomized title, for bulk data
    pub fn random() -> Self {
        Self::new().with_title(Sentence(3..6).fake::<String>())
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_owner(mut self, owner: Uuid) -> Self {
        self.task.owner_id = owner;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.task.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.task.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.task.due_at = Some(due_at);
        self
    }

    pub fn with_remind_at(mut self, remind_at: DateTime<Utc>) -> Self {
        self.task.remind_at = Some(remind_at);
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.task.recurrence = recurrence;
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.task.parent_task_id = Some(parent);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.task.tags = tags;
        self
    }

    pub fn completed(mut self) -> Self {
        self.task.completed = true;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }

    /// The same data as a creation DTO
    pub fn build_new(self) -> NewTask {
        NewTask {
            owner_id: self.task.owner_id,
            title: self.task.title,
            description: self.task.description,
            priority: self.task.priority,
            due_at: self.task.due_at,
            remind_at: self.task.remind_at,
            recurrence: self.task.recurrence,
            parent_task_id: self.task.parent_task_id,
            tags: self.task.tags,
        }
    }
}

/// Builder for registration DTOs
pub struct UserBuilder {
    user: NewUser,
}

impl Default for UserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder {
    pub fn new() -> Self {
        Self {
            user: NewUser {
                email: "test@example.com".to_string(),
                password_hash: "$argon2id$test$hash".to_string(),
                display_name: "Test User".to_string(),
                avatar_url: None,
            },
        }
    }

    /// Builder with a randomized unique-ish email
    pub fn random() -> Self {
        Self::new().with_email(SafeEmail().fake::<String>())
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.user.email = email.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.user.display_name = name.into();
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.user.password_hash = hash.into();
        self
    }

    pub fn build(self) -> NewUser {
        self.user
    }
}

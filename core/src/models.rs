use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Core task representation of the task management platform.
///
/// A task is a unit of work owned by exactly one user. Tasks carry an
/// optional due instant, an optional reminder instant with a sent marker,
/// and a recurrence policy that governs whether completing the task spawns
/// a successor.
///
/// # Examples
///
/// ```rust
/// use task_core::models::{Priority, Recurrence, Task};
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// let task = Task {
///     id: Uuid::new_v4(),
///     owner_id: Uuid::new_v4(),
///     title: "Pay rent".to_string(),
///     description: None,
///     completed: false,
///     priority: Priority::High,
///     due_at: None,
///     remind_at: None,
///     reminder_sent: false,
///     recurrence: Recurrence::Monthly,
///     parent_task_id: None,
///     tags: vec!["finance".to_string()],
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
/// };
///
/// assert!(!task.is_overdue(Utc::now()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Opaque task identifier
    pub id: Uuid,
    /// Owning user; the only principal the task is visible to
    pub owner_id: Uuid,
    /// Brief task title (1..=500 chars after trimming)
    pub title: String,
    /// Optional longer description (<=2000 chars)
    pub description: Option<String>,
    /// Completion flag, toggled atomically
    pub completed: bool,
    /// Task priority
    pub priority: Priority,
    /// Optional due instant (UTC)
    pub due_at: Option<DateTime<Utc>>,
    /// Optional reminder instant (UTC); strictly in the future when set
    pub remind_at: Option<DateTime<Utc>>,
    /// Whether the reminder for the current `remind_at` has been emitted
    pub reminder_sent: bool,
    /// Recurrence policy applied on completion
    pub recurrence: Recurrence,
    /// Task whose completion spawned this one, if any
    pub parent_task_id: Option<Uuid>,
    /// Associated tag names (case-folded, set semantics)
    pub tags: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A task is overdue when its due instant has passed and it is not done.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.due_at, Some(due) if due < now && !self.completed)
    }

    /// Whether the task is in the reminder-pending set at `now`.
    pub fn reminder_pending(&self, now: DateTime<Utc>) -> bool {
        matches!(self.remind_at, Some(at) if at <= now)
            && !self.reminder_sent
            && !self.completed
    }
}

/// Task priority levels, collated numerically low < medium < high.
#[derive(Debug, Clone, Copy, Default, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Collation rank used for sorting
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence policy governing successor creation on completion.
#[derive(Debug, Clone, Copy, Default, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Recurrence::None),
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly),
            "monthly" => Some(Recurrence::Monthly),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data transfer object for creating new tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub remind_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Recurrence,
    pub parent_task_id: Option<Uuid>,
    /// Tag names; upserted case-folded, duplicates collapse
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewTask {
    /// Create a NewTask with only the required fields set
    pub fn new(owner_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            title: title.into(),
            description: None,
            priority: Priority::default(),
            due_at: None,
            remind_at: None,
            recurrence: Recurrence::default(),
            parent_task_id: None,
            tags: vec![],
        }
    }
}

/// Partial update for an existing task.
///
/// The outer `Option` distinguishes "leave unchanged" from "set"; the inner
/// `Option` on clearable fields distinguishes "set to a value" from "clear".
/// Clearing `remind_at` also clears the sent marker so a fresh reminder can
/// later be scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub remind_at: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Recurrence>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due_at.is_none()
            && self.remind_at.is_none()
            && self.recurrence.is_none()
    }
}

/// Sort keys accepted by task listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueAt,
    Priority,
    Title,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filter criteria for querying tasks.
///
/// All predicates are optional and combined with AND logic. `due_at` nulls
/// sort last ascending and first descending, so a task without a due date is
/// never mistaken for the most urgent one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter by priority
    pub priority: Option<Priority>,

    /// Filter by tag name (case-folded before matching)
    pub tag: Option<String>,

    /// Filter by completion flag
    pub completed: Option<bool>,

    /// Restrict to overdue tasks (`due_at < now` and not completed)
    #[serde(default)]
    pub overdue: bool,

    /// Sort key, default creation time
    #[serde(default)]
    pub sort: SortKey,

    /// Sort direction, default ascending
    #[serde(default)]
    pub direction: SortDirection,
}

/// Identity principal owning tasks, tags, and conversations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string; never serialized to callers
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data transfer object for registering a user
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Partial update for the profile surface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
}

/// Per-user label attachable to tasks as a set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Case-folded name, unique per owner
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Chat session between a user and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Derived from the first user message when absent
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One turn inside a conversation, ordered by creation time then id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// A reminder row claimed by the scheduler sweep, joined with the owner's
/// email for notification rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct DueReminder {
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: String,
    pub title: String,
    pub remind_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(due_at: Option<DateTime<Utc>>, completed: bool) -> Task {
        Task {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Test task".to_string(),
            description: None,
            completed,
            priority: Priority::Medium,
            due_at,
            remind_at: None,
            reminder_sent: false,
            recurrence: Recurrence::None,
            parent_task_id: None,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_overdue_requires_past_due_and_open() {
        let now = Utc::now();
        assert!(task(Some(now - Duration::hours(1)), false).is_overdue(now));
        assert!(!task(Some(now - Duration::hours(1)), true).is_overdue(now));
        assert!(!task(Some(now + Duration::hours(1)), false).is_overdue(now));
        assert!(!task(None, false).is_overdue(now));
    }

    #[test]
    fn test_reminder_pending_predicate() {
        let now = Utc::now();
        let mut t = task(None, false);
        assert!(!t.reminder_pending(now));

        t.remind_at = Some(now - Duration::minutes(5));
        assert!(t.reminder_pending(now));

        t.reminder_sent = true;
        assert!(!t.reminder_pending(now));

        t.reminder_sent = false;
        t.completed = true;
        assert!(!t.reminder_pending(now));
    }

    #[test]
    fn test_priority_collation() {
        assert!(Priority::Low.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::High.rank());
        assert_eq!(Priority::parse("high"), Some(Priority::High));
        assert_eq!(Priority::parse("urgent"), None);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_recurrence_parse_round_trip() {
        for r in [
            Recurrence::None,
            Recurrence::Daily,
            Recurrence::Weekly,
            Recurrence::Monthly,
        ] {
            assert_eq!(Recurrence::parse(r.as_str()), Some(r));
        }
        assert!(!Recurrence::None.is_recurring());
        assert!(Recurrence::Monthly.is_recurring());
    }

    #[test]
    fn test_task_changes_is_empty() {
        assert!(TaskChanges::default().is_empty());
        let changes = TaskChanges {
            remind_at: Some(None),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}

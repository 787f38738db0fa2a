//! Task Core Library
//!
//! Foundational domain models, business logic, and trait interfaces for the
//! task management platform. All other crates depend on the types and
//! interfaces defined here.
//!
//! # Architecture
//!
//! - [`models`] - Domain models (Task, Tag, User, Conversation, ...)
//! - [`error`] - Error kinds and result handling
//! - [`repository`] - Repository traits for data persistence
//! - [`events`] - Event envelopes, topics, and the bus capability
//! - [`clients`] - Email and language-model capabilities
//! - [`auth`] - Password hashing, bearer credentials, principals
//! - [`recurrence`] - Occurrence arithmetic for recurring tasks
//! - [`service`] - The TaskCore authority over task state
//! - [`validation`] - Input validation utilities
//!
//! # Example
//!
//! ```rust
//! use task_core::models::{NewTask, Priority};
//! use task_core::validation::Validator;
//! use uuid::Uuid;
//!
//! let mut new_task = NewTask::new(Uuid::new_v4(), "Buy milk");
//! new_task.priority = Priority::High;
//!
//! Validator::validate_title(&new_task.title).unwrap();
//! ```

pub mod auth;
pub mod clients;
pub mod error;
pub mod events;
pub mod models;
pub mod recurrence;
pub mod repository;
pub mod service;
pub mod validation;

// Re-export commonly used types at the crate root for convenience
pub use auth::{AuthService, KdfConfig, Principal, Role, TokenCodec};
pub use clients::{ChatMessage, ChatRole, EmailMessage, EmailSender, LlmClient, LlmReply, ToolCall, ToolSpec};
pub use error::{CoreError, Result};
pub use events::{
    EventBus, EventEnvelope, HandlerOutcome, NoopEventBus, OutboxEntry, ReminderDuePayload,
    TaskCompletedPayload, EVENT_REMINDER_DUE, EVENT_TASK_COMPLETED, TOPIC_REMINDERS,
    TOPIC_TASK_EVENTS,
};
pub use models::{
    Conversation, DueReminder, Message, MessageRole, NewTask, NewUser, Priority, ProfileChanges,
    Recurrence, SortDirection, SortKey, Tag, Task, TaskChanges, TaskFilter, User,
};
pub use repository::{
    ConversationRepository, OutboxRepository, ProcessedEventRepository, TagRepository,
    TaskRepository, UserRepository,
};
pub use service::TaskService;
pub use validation::Validator;

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

//! Event consumers and background loops of the task platform.
//!
//! - [`recurrence`] - `task.completed` consumer creating successor tasks
//! - [`notification`] - `reminder.due` consumer delivering email
//! - [`reminder`] - the periodic claim-then-publish reminder sweep
//! - [`outbox`] - drains committed events to the bus
//! - [`email`] - SMTP implementation of the email capability
//!
//! Handlers return [`task_core::events::HandlerOutcome`], which the
//! subscription endpoints translate into acknowledgment, redelivery, or
//! discard.

pub mod email;
pub mod notification;
pub mod outbox;
pub mod recurrence;
pub mod reminder;

pub use email::SmtpEmailSender;
pub use notification::NotificationWorker;
pub use outbox::OutboxPublisher;
pub use recurrence::RecurrenceWorker;
pub use reminder::ReminderScheduler;

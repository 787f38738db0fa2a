//! Shared harness assembling the real store with in-process doubles for the
//! bus, email relay, and language model.

use std::sync::Arc;
use std::time::Duration;

use agent::{AgentConfig, AgentRunner};
use chrono::Duration as ChronoDuration;
use database::SqliteStore;
use mocks::{RecordingEmailSender, RecordingEventBus, ScriptedLlmClient};
use task_core::{
    auth::{AuthService, KdfConfig, TokenCodec},
    events::{EventEnvelope, HandlerOutcome, TOPIC_REMINDERS, TOPIC_TASK_EVENTS},
    models::User,
    service::TaskService,
};
use workers::{NotificationWorker, OutboxPublisher, RecurrenceWorker, ReminderScheduler};

/// One fully wired platform instance over an in-memory database.
pub struct TestPlatform {
    pub store: Arc<SqliteStore>,
    pub auth: AuthService,
    pub service: TaskService,
    pub bus: Arc<RecordingEventBus>,
    pub email: Arc<RecordingEmailSender>,
    pub recurrence: RecurrenceWorker,
    pub notification: NotificationWorker,
    pub scheduler: ReminderScheduler,
    pub publisher: OutboxPublisher,
}

impl TestPlatform {
    pub async fn new() -> Self {
        let store = Arc::new(SqliteStore::new(":memory:").await.expect("connect"));
        store.migrate().await.expect("migrate");

        let tokens = TokenCodec::new(
            "integration-test-secret-0123456789abcdef",
            ChronoDuration::hours(24),
        );
        let auth = AuthService::new(store.clone(), tokens, KdfConfig::insecure_for_tests());
        let service = TaskService::new(store.clone(), store.clone());

        let bus = Arc::new(RecordingEventBus::new());
        let email = Arc::new(RecordingEmailSender::new());

        let recurrence = RecurrenceWorker::new(service.clone(), store.clone());
        let notification = NotificationWorker::new(store.clone(), email.clone());
        let scheduler = ReminderScheduler::new(
            store.clone(),
            bus.clone(),
            Duration::from_secs(60),
            200,
        );
        let publisher = OutboxPublisher::new(store.clone(), bus.clone(), Duration::from_secs(2), 100);

        Self {
            store,
            auth,
            service,
            bus,
            email,
            recurrence,
            notification,
            scheduler,
            publisher,
        }
    }

    /// Register and log a user in, returning the record and bearer token.
    pub async fn register_and_login(&self, email: &str, password: &str, name: &str) -> (User, String) {
        self.auth.register(email, password, name).await.expect("register");
        self.auth.login(email, password).await.expect("login")
    }

    /// Agent runner over this platform driven by a scripted model.
    pub fn runner(&self, llm: ScriptedLlmClient) -> AgentRunner {
        AgentRunner::new(
            self.service.clone(),
            self.store.clone(),
            Arc::new(llm),
            AgentConfig::default(),
        )
    }

    /// Drain the outbox to the recording bus, then return what landed on
    /// the `task-events` topic.
    pub async fn drain_completions(&self) -> Vec<EventEnvelope> {
        self.publisher.drain_once().await.expect("drain");
        self.bus.published_on(TOPIC_TASK_EVENTS)
    }

    /// Run one scheduler sweep and return what landed on `reminders`.
    pub async fn sweep_reminders(&self) -> Vec<EventEnvelope> {
        self.scheduler.sweep_once().await.expect("sweep");
        self.bus.published_on(TOPIC_REMINDERS)
    }

    /// Deliver an envelope to the recurrence consumer, as the sidecar would.
    pub async fn deliver_completion(&self, envelope: &EventEnvelope) -> HandlerOutcome {
        self.recurrence.handle(envelope).await
    }

    /// Deliver an envelope to the notification consumer.
    pub async fn deliver_reminder(&self, envelope: &EventEnvelope) -> HandlerOutcome {
        self.notification.handle(envelope).await
    }
}

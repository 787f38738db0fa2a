//! Worker behavior tests against the in-memory store and recording doubles.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use mocks::{InMemoryStore, RecordingEmailSender, RecordingEventBus};
use task_core::{
    error::CoreError,
    events::{EventEnvelope, HandlerOutcome, TaskCompletedPayload, TOPIC_REMINDERS, TOPIC_TASK_EVENTS},
    models::{DueReminder, NewTask, Recurrence, TaskFilter},
    repository::{ProcessedEventRepository, TaskRepository, UserRepository},
    service::TaskService,
};
use uuid::Uuid;
use workers::{NotificationWorker, OutboxPublisher, RecurrenceWorker, ReminderScheduler};

struct Harness {
    store: Arc<InMemoryStore>,
    service: TaskService,
    owner: Uuid,
}

impl Harness {
    async fn new() -> Self {
        let store = InMemoryStore::new();
        let user = store
            .create_user(task_core::models::NewUser {
                email: "ann@example.com".to_string(),
                password_hash: "$argon2id$test$hash".to_string(),
                display_name: "Ann".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();
        let service = TaskService::new(store.clone(), store.clone());
        Self { store, service, owner: user.id }
    }

    fn recurrence_worker(&self) -> RecurrenceWorker {
        RecurrenceWorker::new(self.service.clone(), self.store.clone())
    }

    /// Complete the task and return the envelope committed to the outbox.
    async fn complete_and_take_envelope(&self, task_id: Uuid) -> EventEnvelope {
        self.service.toggle_complete(self.owner, task_id).await.unwrap();
        self.store
            .outbox_entries()
            .into_iter()
            .rev()
            .find(|e| e.topic == TOPIC_TASK_EVENTS)
            .expect("completion enqueued an event")
            .envelope
    }
}

#[tokio::test]
async fn test_redelivered_completion_creates_exactly_one_successor() {
    let harness = Harness::new().await;
    let due = Utc::now() + Duration::hours(1);

    let mut new_task = NewTask::new(harness.owner, "weekly review");
    new_task.recurrence = Recurrence::Weekly;
    new_task.due_at = Some(due);
    new_task.tags = vec!["work".to_string()];
    let source = harness.service.create_task(harness.owner, new_task).await.unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    let worker = harness.recurrence_worker();

    // deliver the same event three times
    for _ in 0..3 {
        assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);
    }

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    let successors: Vec<_> = tasks
        .iter()
        .filter(|t| t.parent_task_id == Some(source.id))
        .collect();
    assert_eq!(successors.len(), 1);

    let successor = successors[0];
    assert_eq!(successor.due_at, Some(due + Duration::days(7)));
    assert_eq!(successor.recurrence, Recurrence::Weekly);
    assert_eq!(successor.title, "weekly review");
    assert_eq!(successor.tags, vec!["work".to_string()]);
    assert!(!successor.completed);
}

#[tokio::test]
async fn test_non_recurring_completion_is_acknowledged_without_successor() {
    let harness = Harness::new().await;
    let source = harness
        .service
        .create_task(harness.owner, NewTask::new(harness.owner, "one-off"))
        .await
        .unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    let worker = harness.recurrence_worker();
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn test_deleted_source_is_acknowledged() {
    let harness = Harness::new().await;
    let mut new_task = NewTask::new(harness.owner, "gone soon");
    new_task.recurrence = Recurrence::Daily;
    let source = harness.service.create_task(harness.owner, new_task).await.unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    harness.service.delete_task(harness.owner, source.id).await.unwrap();

    let worker = harness.recurrence_worker();
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);
    // the event is recorded so redelivery short-circuits
    assert!(harness
        .store
        .is_processed(workers::recurrence::CONSUMER, envelope.event_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_reminder_offset_carries_to_successor() {
    let harness = Harness::new().await;
    let due = Utc::now() + Duration::hours(2);

    let mut new_task = NewTask::new(harness.owner, "standup notes");
    new_task.recurrence = Recurrence::Daily;
    new_task.due_at = Some(due);
    new_task.remind_at = Some(due - Duration::minutes(30));
    let source = harness.service.create_task(harness.owner, new_task).await.unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    harness.recurrence_worker().handle(&envelope).await;

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    let successor = tasks
        .iter()
        .find(|t| t.parent_task_id == Some(source.id))
        .expect("successor created");
    let successor_due = due + Duration::days(1);
    assert_eq!(successor.due_at, Some(successor_due));
    assert_eq!(successor.remind_at, Some(successor_due - Duration::minutes(30)));
    assert!(!successor.reminder_sent);
}

#[tokio::test]
async fn test_transient_store_failure_requests_redelivery_then_succeeds() {
    let harness = Harness::new().await;
    let mut new_task = NewTask::new(harness.owner, "flaky");
    new_task.recurrence = Recurrence::Weekly;
    new_task.due_at = Some(Utc::now() + Duration::hours(1));
    let source = harness.service.create_task(harness.owner, new_task).await.unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    let worker = harness.recurrence_worker();

    harness.store.inject_error(CoreError::Database("locked".to_string()));
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Retry);

    // redelivery succeeds and still creates exactly one successor
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(
        tasks.iter().filter(|t| t.parent_task_id == Some(source.id)).count(),
        1
    );
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let harness = Harness::new().await;
    let worker = harness.recurrence_worker();

    let bogus = EventEnvelope {
        event_id: Uuid::new_v4(),
        event_type: "task.completed".to_string(),
        emitted_at: Utc::now(),
        owner_id: harness.owner,
        payload: serde_json::json!({"nonsense": true}),
    };
    assert_eq!(worker.handle(&bogus).await, HandlerOutcome::Drop);
}

#[tokio::test]
async fn test_completion_payload_round_trips_through_worker_path() {
    let harness = Harness::new().await;
    let mut new_task = NewTask::new(harness.owner, "payload check");
    new_task.recurrence = Recurrence::Monthly;
    let source = harness.service.create_task(harness.owner, new_task).await.unwrap();

    let envelope = harness.complete_and_take_envelope(source.id).await;
    let payload: TaskCompletedPayload = envelope.payload_as().unwrap();
    assert_eq!(payload.task_id, source.id);
    assert_eq!(payload.owner_id, harness.owner);
    assert_eq!(payload.recurrence, "monthly");
}

#[tokio::test]
async fn test_notification_delivers_once_per_event() {
    let store = InMemoryStore::new();
    let email = Arc::new(RecordingEmailSender::new());
    let worker = NotificationWorker::new(store.clone(), email.clone());

    let reminder = DueReminder {
        task_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        owner_email: "ann@example.com".to_string(),
        title: "water plants".to_string(),
        remind_at: Utc::now(),
        due_at: None,
    };
    let envelope = EventEnvelope::reminder_due(&reminder, Utc::now());

    for _ in 0..3 {
        assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);
    }
    assert_eq!(email.sent().len(), 1);
    assert_eq!(email.sent()[0].to, "ann@example.com");
}

#[tokio::test]
async fn test_notification_retries_transient_and_acks_permanent() {
    let store = InMemoryStore::new();
    let email = Arc::new(RecordingEmailSender::new());
    let worker = NotificationWorker::new(store.clone(), email.clone());

    let reminder = DueReminder {
        task_id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        owner_email: "ann@example.com".to_string(),
        title: "t".to_string(),
        remind_at: Utc::now(),
        due_at: None,
    };
    let envelope = EventEnvelope::reminder_due(&reminder, Utc::now());

    email.fail_next(CoreError::Transient("relay down".to_string()));
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Retry);
    // redelivery succeeds; still exactly one message
    assert_eq!(worker.handle(&envelope).await, HandlerOutcome::Ack);
    assert_eq!(email.sent().len(), 1);

    // permanent failure on a fresh event: acknowledged, never retried
    let other = EventEnvelope::reminder_due(&reminder, Utc::now());
    email.fail_next(CoreError::Permanent("bad address".to_string()));
    assert_eq!(worker.handle(&other).await, HandlerOutcome::Ack);
    assert_eq!(email.sent().len(), 1);
}

#[tokio::test]
async fn test_sweep_emits_each_reminder_once() {
    let harness = Harness::new().await;
    // plant an already-matured reminder via the repository, the way an
    // elapsed wait leaves one (the service would reject a past instant)
    let mut planted = NewTask::new(harness.owner, "matured");
    planted.remind_at = Some(Utc::now() - Duration::minutes(1));
    TaskRepository::create(harness.store.as_ref(), planted).await.unwrap();

    let bus = Arc::new(RecordingEventBus::new());
    let scheduler = ReminderScheduler::new(
        harness.store.clone(),
        bus.clone(),
        StdDuration::from_secs(60),
        200,
    );

    assert_eq!(scheduler.sweep_once().await.unwrap(), 1);
    assert_eq!(bus.published_on(TOPIC_REMINDERS).len(), 1);

    // the next sweep has nothing left to claim
    assert_eq!(scheduler.sweep_once().await.unwrap(), 0);
    assert_eq!(bus.published_on(TOPIC_REMINDERS).len(), 1);
}

#[tokio::test]
async fn test_sweep_publish_failure_never_duplicates() {
    let harness = Harness::new().await;
    let mut planted = NewTask::new(harness.owner, "claimed then lost");
    planted.remind_at = Some(Utc::now() - Duration::minutes(1));
    TaskRepository::create(harness.store.as_ref(), planted).await.unwrap();

    let bus = Arc::new(RecordingEventBus::new());
    let scheduler = ReminderScheduler::new(
        harness.store.clone(),
        bus.clone(),
        StdDuration::from_secs(60),
        200,
    );

    bus.fail_next(CoreError::Transient("bus down".to_string()));
    assert_eq!(scheduler.sweep_once().await.unwrap(), 0);

    // the row was claimed before the publish attempt: at-most-once means
    // the reminder is lost, not repeated
    assert_eq!(scheduler.sweep_once().await.unwrap(), 0);
    assert!(bus.published_on(TOPIC_REMINDERS).is_empty());
}

#[tokio::test]
async fn test_outbox_drains_in_order_and_survives_bus_outage() {
    let harness = Harness::new().await;
    let mut ids = vec![];
    for i in 0..3 {
        let task = harness
            .service
            .create_task(harness.owner, NewTask::new(harness.owner, format!("t{i}")))
            .await
            .unwrap();
        harness.service.toggle_complete(harness.owner, task.id).await.unwrap();
        ids.push(task.id);
    }

    let bus = Arc::new(RecordingEventBus::new());
    let publisher = OutboxPublisher::new(
        harness.store.clone(),
        bus.clone(),
        StdDuration::from_millis(100),
        10,
    );

    // first drain fails on the very first entry; nothing is marked
    bus.fail_next(CoreError::Transient("bus down".to_string()));
    assert_eq!(publisher.drain_once().await.unwrap(), 0);
    assert!(bus.published().is_empty());

    // the outage ends; everything drains, oldest first
    assert_eq!(publisher.drain_once().await.unwrap(), 3);
    let published = bus.published_on(TOPIC_TASK_EVENTS);
    let task_ids: Vec<Uuid> = published
        .iter()
        .map(|e| e.payload_as::<TaskCompletedPayload>().unwrap().task_id)
        .collect();
    assert_eq!(task_ids, ids);

    // and a further drain is a no-op
    assert_eq!(publisher.drain_once().await.unwrap(), 0);
}

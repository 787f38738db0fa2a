//! End-to-end scenarios across registration, task state, events, workers,
//! and the agent.

use chrono::{Duration, Utc};
use integration_tests::TestPlatform;
use mocks::ScriptedLlmClient;
use serde_json::json;
use task_core::{
    clients::{LlmReply, ToolCall},
    error::CoreError,
    events::HandlerOutcome,
    models::{NewTask, Priority, Recurrence, TaskFilter},
    repository::ConversationRepository,
};

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> LlmReply {
    LlmReply::ToolCalls(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }])
}

#[tokio::test]
async fn test_register_create_and_filtered_list() {
    let platform = TestPlatform::new().await;
    let (ann, token) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    // the bearer credential resolves back to the registered principal
    let principal = platform.auth.tokens().verify(&token).unwrap();
    assert_eq!(principal, task_core::auth::Principal::User(ann.id));

    let mut new_task = NewTask::new(ann.id, "buy milk");
    new_task.priority = Priority::High;
    platform.service.create_task(ann.id, new_task).await.unwrap();

    let mut other = NewTask::new(ann.id, "someday maybe");
    other.priority = Priority::Low;
    platform.service.create_task(ann.id, other).await.unwrap();

    let filter = TaskFilter { priority: Some(Priority::High), ..Default::default() };
    let found = platform.service.list_tasks(ann.id, &filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "buy milk");
}

#[tokio::test]
async fn test_completion_event_redelivery_creates_one_successor() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let due = Utc::now() + Duration::hours(3);
    let mut new_task = NewTask::new(ann.id, "weekly review");
    new_task.recurrence = Recurrence::Weekly;
    new_task.due_at = Some(due);
    let source = platform.service.create_task(ann.id, new_task).await.unwrap();

    platform.service.toggle_complete(ann.id, source.id).await.unwrap();

    // the outbox publisher moves the committed event to the bus
    let events = platform.drain_completions().await;
    assert_eq!(events.len(), 1);

    // the bus redelivers the same event three times
    for _ in 0..3 {
        assert_eq!(
            platform.deliver_completion(&events[0]).await,
            HandlerOutcome::Ack
        );
    }

    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    let successors: Vec<_> = tasks
        .iter()
        .filter(|t| t.parent_task_id == Some(source.id))
        .collect();
    assert_eq!(successors.len(), 1);
    assert_eq!(successors[0].due_at, Some(due + Duration::days(7)));
    assert!(!successors[0].completed);
}

#[tokio::test]
async fn test_reopening_a_task_publishes_nothing() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;
    let task = platform
        .service
        .create_task(ann.id, NewTask::new(ann.id, "flip flop"))
        .await
        .unwrap();

    platform.service.toggle_complete(ann.id, task.id).await.unwrap();
    platform.service.toggle_complete(ann.id, task.id).await.unwrap();

    let events = platform.drain_completions().await;
    assert_eq!(events.len(), 1, "only the completing transition emits");
}

#[tokio::test]
async fn test_reminder_pipeline_fires_exactly_once() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let task = platform
        .service
        .create_task(ann.id, NewTask::new(ann.id, "water plants"))
        .await
        .unwrap();
    platform
        .service
        .set_reminder(ann.id, task.id, Utc::now() + Duration::milliseconds(50))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;

    // first sweep claims and publishes exactly one event
    let events = platform.sweep_reminders().await;
    assert_eq!(events.len(), 1);

    // the claimed row is marked sent
    let task = platform.service.get_task(ann.id, task.id).await.unwrap();
    assert!(task.reminder_sent);

    // further sweeps find nothing
    let events = platform.sweep_reminders().await;
    assert_eq!(events.len(), 1);

    // delivery with redelivery still mails once
    for _ in 0..2 {
        assert_eq!(
            platform.deliver_reminder(&events[0]).await,
            HandlerOutcome::Ack
        );
    }
    let sent = platform.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.y");
    assert!(sent[0].subject.contains("water plants"));
}

#[tokio::test]
async fn test_rescheduled_reminder_fires_again() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;
    let task = platform
        .service
        .create_task(ann.id, NewTask::new(ann.id, "stretch"))
        .await
        .unwrap();

    platform
        .service
        .set_reminder(ann.id, task.id, Utc::now() + Duration::milliseconds(40))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(platform.sweep_reminders().await.len(), 1);

    // setting a fresh reminder clears the sent marker and qualifies the
    // task for the next sweep
    platform
        .service
        .set_reminder(ann.id, task.id, Utc::now() + Duration::milliseconds(40))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(platform.sweep_reminders().await.len(), 2);
}

#[tokio::test]
async fn test_cross_user_isolation() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;
    let (bob, _) = platform.register_and_login("b@x.y", "secret456", "Bob").await;

    let task = platform
        .service
        .create_task(ann.id, NewTask::new(ann.id, "private"))
        .await
        .unwrap();

    assert_eq!(
        platform.service.get_task(bob.id, task.id).await,
        Err(CoreError::task_not_found())
    );
    assert_eq!(
        platform.service.delete_task(bob.id, task.id).await,
        Err(CoreError::task_not_found())
    );

    // no state change happened
    let still_there = platform.service.get_task(ann.id, task.id).await.unwrap();
    assert_eq!(still_there.id, task.id);
}

#[tokio::test]
async fn test_login_failures_are_uniform() {
    let platform = TestPlatform::new().await;
    platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let unknown_user = platform.auth.login("nobody@x.y", "secret123").await;
    let wrong_password = platform.auth.login("a@x.y", "secret124").await;
    assert_eq!(unknown_user.unwrap_err(), wrong_password.unwrap_err());
}

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let mut new_task = NewTask::new(ann.id, "detailed");
    new_task.description = Some("with a description".to_string());
    new_task.priority = Priority::High;
    new_task.due_at = Some(Utc::now() + Duration::days(2));
    new_task.recurrence = Recurrence::Monthly;
    new_task.tags = vec!["home".to_string(), "garden".to_string()];
    let created = platform.service.create_task(ann.id, new_task).await.unwrap();

    let fetched = platform.service.get_task(ann.id, created.id).await.unwrap();
    assert_eq!(created, fetched);
}

#[tokio::test]
async fn test_agent_turn_drives_task_core_end_to_end() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let llm = ScriptedLlmClient::with_replies([
        tool_call(
            "call-1",
            "add_task",
            json!({"title": "buy milk", "priority": "high", "due_date": "tomorrow"}),
        ),
        LlmReply::Message("Added \"buy milk\" for tomorrow.".to_string()),
    ]);
    let runner = platform.runner(llm);

    let outcome = runner
        .run_turn(ann.id, None, "add buy milk for tomorrow, high priority")
        .await
        .unwrap();
    assert!(outcome.assistant_message.content.contains("buy milk"));

    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].priority, Priority::High);
    assert!(tasks[0].due_at.is_some());

    // the transcript survived in the store
    let messages = platform
        .store
        .messages(outcome.conversation.id, ann.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_agent_refuses_forbidden_tool_and_touches_nothing() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;
    let keep = platform
        .service
        .create_task(ann.id, NewTask::new(ann.id, "precious"))
        .await
        .unwrap();

    // spy model: asks for an operation outside the tool surface
    let llm = ScriptedLlmClient::with_replies([tool_call("call-1", "delete_all_tasks", json!({}))]);
    let runner = platform.runner(llm);

    let outcome = runner
        .run_turn(ann.id, None, "delete all my tasks")
        .await
        .unwrap();
    assert!(outcome.assistant_message.content.contains("not an operation"));

    // individual deletes through the surface remain possible
    let llm = ScriptedLlmClient::with_replies([
        tool_call("call-1", "delete_task", json!({"task_id": keep.id.to_string()})),
        LlmReply::Message("Deleted it.".to_string()),
    ]);
    let runner = platform.runner(llm);
    runner.run_turn(ann.id, None, "ok, delete the precious task").await.unwrap();

    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn test_successor_chain_is_bounded_per_completion() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let mut new_task = NewTask::new(ann.id, "daily log");
    new_task.recurrence = Recurrence::Daily;
    new_task.due_at = Some(Utc::now() + Duration::hours(1));
    let source = platform.service.create_task(ann.id, new_task).await.unwrap();

    platform.service.toggle_complete(ann.id, source.id).await.unwrap();
    let events = platform.drain_completions().await;
    platform.deliver_completion(&events[0]).await;

    // completing the successor spawns the next link, not another copy of
    // the first
    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    let successor = tasks
        .iter()
        .find(|t| t.parent_task_id == Some(source.id))
        .expect("first successor")
        .clone();

    platform.service.toggle_complete(ann.id, successor.id).await.unwrap();
    let events = platform.drain_completions().await;
    let second_event = events.last().unwrap();
    platform.deliver_completion(second_event).await;

    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(
        tasks
            .iter()
            .filter(|t| t.parent_task_id == Some(successor.id))
            .count(),
        1
    );
    // the chain never points back at itself
    for task in &tasks {
        assert_ne!(task.parent_task_id, Some(task.id));
    }
}

#[tokio::test]
async fn test_unknown_user_event_is_acknowledged_not_poisoned() {
    let platform = TestPlatform::new().await;
    let (ann, _) = platform.register_and_login("a@x.y", "secret123", "Ann").await;

    let mut new_task = NewTask::new(ann.id, "orphan source");
    new_task.recurrence = Recurrence::Daily;
    let source = platform.service.create_task(ann.id, new_task).await.unwrap();
    platform.service.toggle_complete(ann.id, source.id).await.unwrap();
    let events = platform.drain_completions().await;

    // the task disappears before the event arrives
    platform.service.delete_task(ann.id, source.id).await.unwrap();

    assert_eq!(
        platform.deliver_completion(&events[0]).await,
        HandlerOutcome::Ack
    );
    let tasks = platform
        .service
        .list_tasks(ann.id, &TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

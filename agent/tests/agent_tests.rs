//! Agent turn-loop tests with a scripted language model.

use std::sync::Arc;

use agent::{AgentConfig, AgentRunner};
use chrono::{Duration, Utc};
use mocks::{InMemoryStore, ScriptedLlmClient};
use serde_json::json;
use task_core::{
    clients::{LlmReply, ToolCall},
    models::{MessageRole, NewTask, TaskFilter},
    repository::ConversationRepository,
    service::TaskService,
};
use uuid::Uuid;

struct Harness {
    store: Arc<InMemoryStore>,
    service: TaskService,
    owner: Uuid,
}

impl Harness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let service = TaskService::new(store.clone(), store.clone());
        Self { store, service, owner: Uuid::new_v4() }
    }

    fn runner(&self, llm: ScriptedLlmClient) -> AgentRunner {
        AgentRunner::new(
            self.service.clone(),
            self.store.clone(),
            Arc::new(llm),
            AgentConfig::default(),
        )
    }
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> LlmReply {
    LlmReply::ToolCalls(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }])
}

#[tokio::test]
async fn test_plain_reply_commits_turn_and_titles_conversation() {
    let harness = Harness::new();
    let llm = ScriptedLlmClient::with_replies([LlmReply::Message("Hello! Ask me about tasks.".to_string())]);
    let runner = harness.runner(llm);

    let outcome = runner
        .run_turn(harness.owner, None, "hi there")
        .await
        .unwrap();

    assert_eq!(outcome.user_message.role, MessageRole::User);
    assert_eq!(outcome.assistant_message.role, MessageRole::Assistant);
    assert_eq!(outcome.assistant_message.content, "Hello! Ask me about tasks.");
    assert_eq!(outcome.conversation.title.as_deref(), Some("hi there"));

    let messages = harness
        .store
        .messages(outcome.conversation.id, harness.owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_add_task_tool_call_creates_task() {
    let harness = Harness::new();
    let llm = ScriptedLlmClient::with_replies([
        tool_call(
            "call-1",
            "add_task",
            json!({"title": "buy milk", "priority": "high", "tags": ["errand"]}),
        ),
        LlmReply::Message("Created \"buy milk\".".to_string()),
    ]);
    let runner = harness.runner(llm);

    runner
        .run_turn(harness.owner, None, "remind me to buy milk")
        .await
        .unwrap();

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "buy milk");
    assert_eq!(tasks[0].tags, vec!["errand".to_string()]);
}

#[tokio::test]
async fn test_forbidden_tool_ends_turn_without_dispatch() {
    let harness = Harness::new();
    // the spy model asks for an operation outside the surface
    let llm = ScriptedLlmClient::with_replies([tool_call(
        "call-1",
        "delete_all_tasks",
        json!({}),
    )]);
    let runner = harness.runner(llm);

    let before_calls = harness.store.call_history().len();
    let outcome = runner
        .run_turn(harness.owner, None, "delete all my tasks")
        .await
        .unwrap();

    assert!(outcome
        .assistant_message
        .content
        .contains("not an operation I'm permitted"));

    // no task repository operation ran after the turn started; only the
    // conversation plumbing did
    let task_ops = ["create", "update", "delete", "toggle_completed", "get", "list", "search"];
    let history = harness.store.call_history();
    assert!(
        history[before_calls..]
            .iter()
            .all(|call| !task_ops.contains(&call.as_str())),
        "forbidden tool leaked into the task repository: {history:?}"
    );
}

#[tokio::test]
async fn test_validation_error_feeds_back_and_model_corrects() {
    let harness = Harness::new();
    let llm = ScriptedLlmClient::with_replies([
        tool_call("call-1", "add_task", json!({"title": "   "})),
        tool_call("call-2", "add_task", json!({"title": "water plants"})),
        LlmReply::Message("Done.".to_string()),
    ]);
    let runner = harness.runner(llm);

    let outcome = runner
        .run_turn(harness.owner, None, "add a watering task")
        .await
        .unwrap();
    assert_eq!(outcome.assistant_message.content, "Done.");

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "water plants");
}

#[tokio::test]
async fn test_iteration_bound_yields_error_reply() {
    let harness = Harness::new();
    let llm = ScriptedLlmClient::new();
    for i in 0..10 {
        llm.push_reply(tool_call(&format!("call-{i}"), "list_tasks", json!({})));
    }
    let runner = harness.runner(llm);

    let outcome = runner
        .run_turn(harness.owner, None, "keep listing")
        .await
        .unwrap();
    assert!(outcome
        .assistant_message
        .content
        .contains("allowed number of steps"));
}

#[tokio::test]
async fn test_complete_task_by_unique_title_fragment() {
    let harness = Harness::new();
    harness
        .service
        .create_task(harness.owner, NewTask::new(harness.owner, "Buy milk"))
        .await
        .unwrap();

    let llm = ScriptedLlmClient::with_replies([
        tool_call("call-1", "complete_task", json!({"title": "buy milk"})),
        LlmReply::Message("Marked it done.".to_string()),
    ]);
    let runner = harness.runner(llm);
    runner
        .run_turn(harness.owner, None, "I bought the milk")
        .await
        .unwrap();

    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks[0].completed);
}

#[tokio::test]
async fn test_ambiguous_title_asks_for_disambiguation() {
    let harness = Harness::new();
    for title in ["buy milk", "buy milk and eggs"] {
        harness
            .service
            .create_task(harness.owner, NewTask::new(harness.owner, title))
            .await
            .unwrap();
    }

    let llm = ScriptedLlmClient::with_replies([
        tool_call("call-1", "complete_task", json!({"title": "buy milk"})),
        LlmReply::Message("Which of the two do you mean?".to_string()),
    ]);
    let runner = harness.runner(llm);
    let outcome = runner
        .run_turn(harness.owner, None, "complete buy milk")
        .await
        .unwrap();

    // the ambiguity came back as a tool result and the model relayed it;
    // nothing was toggled
    assert_eq!(outcome.assistant_message.content, "Which of the two do you mean?");
    let tasks = harness
        .service
        .list_tasks(harness.owner, &TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks.iter().all(|t| !t.completed));
}

#[tokio::test]
async fn test_cross_user_task_is_not_found() {
    let harness = Harness::new();
    let other = Uuid::new_v4();
    let foreign = harness
        .service
        .create_task(other, NewTask::new(other, "someone else's"))
        .await
        .unwrap();

    let llm = ScriptedLlmClient::with_replies([tool_call(
        "call-1",
        "delete_task",
        json!({"task_id": foreign.id.to_string()}),
    )]);
    let runner = harness.runner(llm);
    let outcome = runner
        .run_turn(harness.owner, None, "delete that task")
        .await
        .unwrap();

    assert!(outcome.assistant_message.content.contains("couldn't find"));
    // the foreign task is untouched
    assert!(harness
        .service
        .get_task(other, foreign.id)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_follow_up_turn_sees_prior_transcript() {
    let harness = Harness::new();
    let llm = ScriptedLlmClient::with_replies([
        LlmReply::Message("Noted.".to_string()),
        LlmReply::Message("As I said: noted.".to_string()),
    ]);
    let runner = harness.runner(llm);

    let first = runner
        .run_turn(harness.owner, None, "remember the milk")
        .await
        .unwrap();
    runner
        .run_turn(harness.owner, Some(first.conversation.id), "did you get that?")
        .await
        .unwrap();

    let messages = harness
        .store
        .messages(first.conversation.id, harness.owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(messages.len(), 4);

    // title still derives from the first message only
    let conversation = harness
        .store
        .get_conversation(first.conversation.id, harness.owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.title.as_deref(), Some("remember the milk"));
}

#[tokio::test]
async fn test_reminder_duration_resolves_against_clock() {
    let harness = Harness::new();
    let task = harness
        .service
        .create_task(harness.owner, NewTask::new(harness.owner, "call dentist"))
        .await
        .unwrap();

    let llm = ScriptedLlmClient::with_replies([
        tool_call(
            "call-1",
            "set_reminder",
            json!({"task_id": task.id.to_string(), "remind_at": "in 2 hours"}),
        ),
        LlmReply::Message("Reminder set.".to_string()),
    ]);
    let runner = harness.runner(llm);
    let before = Utc::now();
    runner
        .run_turn(harness.owner, None, "remind me in 2 hours")
        .await
        .unwrap();

    let task = harness.service.get_task(harness.owner, task.id).await.unwrap();
    let remind_at = task.remind_at.expect("reminder set");
    assert!(remind_at >= before + Duration::hours(2));
    assert!(remind_at <= Utc::now() + Duration::hours(2));
}

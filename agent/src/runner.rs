use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use task_core::{
    clients::{ChatMessage, LlmClient, LlmReply},
    error::{CoreError, Result},
    models::{Conversation, Message, MessageRole},
    repository::ConversationRepository,
    service::TaskService,
};
use uuid::Uuid;

use crate::tools::{is_known_tool, tool_specs, ToolDispatcher};

const SYSTEM_PROMPT: &str = "You are a task management assistant. You manage exactly one \
user's tasks through the provided tools and never fabricate task state: read it with a tool \
before answering questions about it. Keep replies short and concrete.";

const TITLE_MAX_CHARS: usize = 60;

/// Agent loop configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bound on planning iterations per turn
    pub max_tool_iterations: u32,
    /// Turn-level deadline; partial tool work is kept when it expires
    pub turn_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 8,
            turn_timeout: Duration::from_secs(120),
        }
    }
}

/// The committed result of one user turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation: Conversation,
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Turn-taking loop translating user utterances into bounded tool
/// invocations against TaskCore.
///
/// Each turn runs with the calling user's principal; tools cannot escalate
/// and cannot reach state the user does not own.
#[derive(Clone)]
pub struct AgentRunner {
    service: TaskService,
    conversations: Arc<dyn ConversationRepository>,
    llm: Arc<dyn LlmClient>,
    config: AgentConfig,
}

impl AgentRunner {
    pub fn new(
        service: TaskService,
        conversations: Arc<dyn ConversationRepository>,
        llm: Arc<dyn LlmClient>,
        config: AgentConfig,
    ) -> Self {
        Self { service, conversations, llm, config }
    }

    /// Run one turn: plan with the model, dispatch permitted tools, and
    /// commit the user and assistant messages in a single transaction.
    ///
    /// A missing `conversation_id` starts a new conversation; its title is
    /// derived from this first user message.
    pub async fn run_turn(
        &self,
        owner: Uuid,
        conversation_id: Option<Uuid>,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(CoreError::empty_field("message"));
        }

        let conversation = match conversation_id {
            Some(id) => self
                .conversations
                .get_conversation(id, owner)
                .await?
                .ok_or_else(CoreError::conversation_not_found)?,
            None => self.conversations.create_conversation(owner, None).await?,
        };

        let mut transcript = self.load_transcript(&conversation, owner).await?;
        transcript.push(ChatMessage::user(user_text));

        let reply = self.plan_and_dispatch(owner, &mut transcript).await?;

        let (user_message, assistant_message) = self
            .conversations
            .append_turn(conversation.id, owner, user_text, &reply)
            .await?
            .ok_or_else(CoreError::conversation_not_found)?;

        let conversation = if conversation.title.is_none() {
            self.conversations
                .set_title_if_empty(conversation.id, owner, &derive_title(user_text))
                .await?
                .unwrap_or(conversation)
        } else {
            conversation
        };

        Ok(TurnOutcome { conversation, user_message, assistant_message })
    }

    async fn load_transcript(
        &self,
        conversation: &Conversation,
        owner: Uuid,
    ) -> Result<Vec<ChatMessage>> {
        let mut transcript = vec![ChatMessage::system(SYSTEM_PROMPT)];
        let prior = self
            .conversations
            .messages(conversation.id, owner)
            .await?
            .ok_or_else(CoreError::conversation_not_found)?;
        for message in prior {
            transcript.push(match message.role {
                MessageRole::User => ChatMessage::user(message.content),
                MessageRole::Assistant => ChatMessage::assistant(message.content),
            });
        }
        Ok(transcript)
    }

    /// The planning loop: call the model, dispatch its tool requests,
    /// feed results back, and stop at a final message or at the bound.
    async fn plan_and_dispatch(
        &self,
        owner: Uuid,
        transcript: &mut Vec<ChatMessage>,
    ) -> Result<String> {
        let dispatcher = ToolDispatcher::new(self.service.clone(), owner);
        let specs = tool_specs();
        let started = Instant::now();

        for iteration in 0..self.config.max_tool_iterations {
            if started.elapsed() > self.config.turn_timeout {
                tracing::warn!(iteration, "Turn deadline expired mid-loop");
                return Ok(
                    "I ran out of time before finishing; the steps already taken have been \
                     applied. Please ask again to continue."
                        .to_string(),
                );
            }

            let reply = self.llm.plan(transcript, &specs).await?;
            let calls = match reply {
                LlmReply::Message(text) => return Ok(text),
                LlmReply::ToolCalls(calls) => calls,
            };

            for call in calls {
                if !is_known_tool(&call.name) {
                    tracing::warn!(tool = %call.name, "Model requested a tool outside the surface");
                    return Ok(format!(
                        "I can't do that: '{}' is not an operation I'm permitted to perform.",
                        call.name
                    ));
                }

                transcript.push(ChatMessage::assistant(
                    serde_json::json!({"toolCall": {"id": call.id, "name": call.name, "arguments": call.arguments}})
                        .to_string(),
                ));

                match dispatcher.dispatch(&call, Utc::now()).await {
                    Ok(result) => {
                        transcript.push(ChatMessage::tool_result(call.id, result.to_string()));
                    }
                    // a validation failure goes back to the model so it can
                    // correct itself within the iteration bound
                    Err(CoreError::Validation(message)) => {
                        tracing::debug!(tool = %call.name, %message, "Tool call rejected");
                        transcript.push(ChatMessage::tool_result(
                            call.id,
                            serde_json::json!({"error": message}).to_string(),
                        ));
                    }
                    Err(CoreError::NotFound(message)) => {
                        return Ok(format!("I couldn't find that: {message}."));
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        tracing::warn!(
            bound = self.config.max_tool_iterations,
            "Turn exceeded the tool iteration bound"
        );
        Ok(
            "I couldn't finish that request within the allowed number of steps; the steps \
             already taken have been applied."
                .to_string(),
        )
    }
}

/// Conversation title derived from the first user message.
fn derive_title(user_text: &str) -> String {
    let mut title: String = user_text.chars().take(TITLE_MAX_CHARS).collect();
    if user_text.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

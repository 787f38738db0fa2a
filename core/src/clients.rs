//! Capability traits for external collaborators.
//!
//! The core treats email delivery and the language model as outbound
//! capabilities behind trait seams, so workers and the agent can be tested
//! against in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A rendered notification ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound email capability.
///
/// Deliveries to the same recipient are serialized by the caller so a
/// mailbox never observes reordered notifications.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message.
    ///
    /// # Returns
    /// * `Ok(())` - Accepted by the mail relay
    /// * `Err(CoreError::Transient)` - Retryable relay failure
    /// * `Err(CoreError::Permanent)` - Invalid address or rejected content
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Role of one chat transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One transcript entry handed to the language model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Present on `Tool` entries: the id of the call this result answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into(), tool_call_id: None }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Declaration of one tool the model may request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments
    pub parameters: Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One planning step returned by the model: either a final reply or a batch
/// of tool calls to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    Message(String),
    ToolCalls(Vec<ToolCall>),
}

/// Language model capability used by the agent loop.
///
/// The model is told only about the supplied tool specs; anything else it
/// requests is refused by the dispatcher.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produce the next planning step for the given transcript.
    ///
    /// # Returns
    /// * `Ok(LlmReply)` - A final message or tool-call requests
    /// * `Err(CoreError::Transient)` - Retryable model failure
    /// * `Err(CoreError::DeadlineExceeded)` - Call deadline expired
    async fn plan(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<LlmReply>;
}

//! Test doubles for the outbound capabilities: email and language model.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use task_core::{
    clients::{ChatMessage, EmailMessage, EmailSender, LlmClient, LlmReply, ToolSpec},
    error::{CoreError, Result},
};

/// Email sender that records deliveries and can fail on demand.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    fail_next: Mutex<Option<CoreError>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: CoreError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Language model double driven by a queue of scripted replies.
///
/// Each `plan` call pops the next reply and records the transcript and tool
/// specs it was given, so tests can assert on what the model saw.
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<LlmReply>>,
    calls: Mutex<Vec<(Vec<ChatMessage>, Vec<ToolSpec>)>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client that will play these replies in order
    pub fn with_replies(replies: impl IntoIterator<Item = LlmReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn push_reply(&self, reply: LlmReply) {
        self.replies.lock().push_back(reply);
    }

    /// Every (transcript, tools) pair the client was called with
    pub fn calls(&self) -> Vec<(Vec<ChatMessage>, Vec<ToolSpec>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn plan(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<LlmReply> {
        self.calls
            .lock()
            .push((messages.to_vec(), tools.to_vec()));
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| CoreError::Internal("scripted LLM ran out of replies".to_string()))
    }
}

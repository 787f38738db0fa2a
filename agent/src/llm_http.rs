//! HTTP client for an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use task_core::{
    clients::{ChatMessage, ChatRole, LlmClient, LlmReply, ToolCall, ToolSpec},
    error::{CoreError, Result},
};

/// Language-model client speaking the chat-completions wire format.
///
/// Calls are bounded two ways: a per-call timeout, and a process-level
/// in-flight cap so concurrent turns cannot stampede the model endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    in_flight: Semaphore,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        call_timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("LLM client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            in_flight: Semaphore::new(max_in_flight.max(1)),
        })
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| match m.role {
                ChatRole::System => json!({"role": "system", "content": m.content}),
                ChatRole::User => json!({"role": "user", "content": m.content}),
                ChatRole::Assistant => json!({"role": "assistant", "content": m.content}),
                ChatRole::Tool => json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id,
                    "content": m.content,
                }),
            })
            .collect()
    }

    fn wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn plan(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<LlmReply> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| CoreError::Internal("LLM semaphore closed".to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": Self::wire_messages(messages),
            "tools": Self::wire_tools(tools),
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::DeadlineExceeded("LLM call timed out".to_string())
                } else {
                    CoreError::Transient(format!("LLM unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CoreError::Transient(format!("LLM returned {status}")));
        }
        if !status.is_success() {
            return Err(CoreError::Permanent(format!("LLM rejected request: {status}")));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| CoreError::Permanent(format!("malformed LLM response: {e}")))?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| CoreError::Permanent("LLM response had no choices".to_string()))?;

        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|c| {
                    let arguments: Value =
                        serde_json::from_str(&c.function.arguments).map_err(|e| {
                            CoreError::Permanent(format!("malformed tool arguments: {e}"))
                        })?;
                    Ok(ToolCall { id: c.id, name: c.function.name, arguments })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(LlmReply::ToolCalls(calls));
        }

        Ok(LlmReply::Message(message.content.unwrap_or_default()))
    }
}

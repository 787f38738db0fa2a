use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use task_core::{
    error::CoreError,
    models::{Conversation, Message},
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AppState, OwnerScope};

#[derive(Deserialize)]
pub struct ChatBody {
    /// Absent to start a new conversation
    pub conversation_id: Option<Uuid>,
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub conversation: Conversation,
    pub reply: String,
    pub messages: Vec<Message>,
}

/// One agent turn: the model plans, permitted tools run with the caller's
/// principal, and the committed transcript pair comes back.
pub async fn chat(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = state
        .runner
        .run_turn(owner, body.conversation_id, &body.message)
        .await?;

    Ok(Json(ChatResponse {
        reply: outcome.assistant_message.content.clone(),
        messages: vec![outcome.user_message, outcome.assistant_message],
        conversation: outcome.conversation,
    }))
}

pub async fn list(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.conversations.list_conversations(owner).await?))
}

pub async fn messages(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .conversations
        .messages(id, owner)
        .await?
        .ok_or_else(CoreError::conversation_not_found)?;
    Ok(Json(messages))
}

pub async fn delete(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.conversations.delete_conversation(id, owner).await? {
        return Err(ApiError(CoreError::conversation_not_found()));
    }
    Ok(StatusCode::NO_CONTENT)
}

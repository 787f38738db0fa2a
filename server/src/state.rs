use std::sync::Arc;

use agent::AgentRunner;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use task_core::{
    auth::{AuthService, Principal, TokenCodec},
    error::CoreError,
    repository::ConversationRepository,
    service::TaskService,
};
use uuid::Uuid;
use workers::{NotificationWorker, RecurrenceWorker};

use crate::error::ApiError;

/// Header naming the user a service credential acts for
pub const ACTING_USER_HEADER: &str = "x-acting-user";

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub tasks: TaskService,
    pub conversations: Arc<dyn ConversationRepository>,
    pub runner: AgentRunner,
    pub tokens: TokenCodec,
    /// Present when the recurrence consumer is enabled
    pub recurrence: Option<Arc<RecurrenceWorker>>,
    /// Present when the notification consumer is enabled
    pub notification: Option<Arc<NotificationWorker>>,
}

/// Extracts and verifies the bearer credential of a request.
pub struct AuthPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError(CoreError::invalid_credentials()))?;

        let principal = state.tokens.verify(token.trim())?;
        Ok(AuthPrincipal(principal))
    }
}

/// Resolves the owner a request operates on: the bearer's own user id, or
/// for service credentials the user named by the acting-user header.
pub struct OwnerScope(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for OwnerScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthPrincipal(principal) = AuthPrincipal::from_request_parts(parts, state).await?;

        let acting = match parts.headers.get(ACTING_USER_HEADER) {
            None => None,
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| ApiError(CoreError::Validation("invalid acting-user header".to_string())))?;
                Some(Uuid::parse_str(raw.trim()).map_err(|_| {
                    ApiError(CoreError::Validation("invalid acting-user header".to_string()))
                })?)
            }
        };

        Ok(OwnerScope(principal.owner_for(acting)?))
    }
}

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use task_core::{auth::Principal, error::CoreError, models::ProfileChanges, models::User};

use crate::error::ApiError;
use crate::state::{AppState, AuthPrincipal};

#[derive(Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Deserialize, Default)]
pub struct ProfileBody {
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "crate::routes::double_option")]
    pub avatar_url: Option<Option<String>>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .auth
        .register(&body.email, &body.password, &body.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (user, token) = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(LoginResponse { token, user }))
}

pub async fn me(
    AuthPrincipal(principal): AuthPrincipal,
    State(state): State<AppState>,
) -> Result<Json<User>, ApiError> {
    let Principal::User(user_id) = principal else {
        return Err(ApiError(CoreError::invalid_credentials()));
    };
    Ok(Json(state.auth.me(user_id).await?))
}

pub async fn update_me(
    AuthPrincipal(principal): AuthPrincipal,
    State(state): State<AppState>,
    Json(body): Json<ProfileBody>,
) -> Result<Json<User>, ApiError> {
    let Principal::User(user_id) = principal else {
        return Err(ApiError(CoreError::invalid_credentials()));
    };
    let changes = ProfileChanges {
        email: body.email,
        display_name: body.display_name,
        avatar_url: body.avatar_url,
    };
    Ok(Json(state.auth.update_profile(user_id, changes).await?))
}

/// Bearer credentials are stateless; logout is client-side discard. The
/// endpoint exists so clients have a uniform call to make.
pub async fn logout(AuthPrincipal(_): AuthPrincipal) -> StatusCode {
    StatusCode::NO_CONTENT
}

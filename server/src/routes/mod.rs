//! HTTP surface: route table and shared deserialization helpers.

pub mod auth;
pub mod conversations;
pub mod events;
pub mod tasks;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Deserializer};

use crate::state::AppState;

/// Distinguishes an absent JSON field from an explicit null: absent means
/// "leave unchanged", null means "clear". Pair with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Build the full route table over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(events::healthz))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me).patch(auth::update_me))
        .route("/tasks", post(tasks::create).get(tasks::list))
        .route("/tasks/search", get(tasks::search))
        .route(
            "/tasks/:id",
            get(tasks::get).patch(tasks::update).delete(tasks::delete),
        )
        .route("/tasks/:id/toggle", post(tasks::toggle))
        .route("/tasks/:id/reminder", put(tasks::set_reminder))
        .route("/tasks/:id/tags", post(tasks::add_tag))
        .route("/tasks/:id/tags/:name", delete(tasks::remove_tag))
        .route("/tags", get(tasks::list_tags))
        .route("/tags/:name", delete(tasks::delete_tag))
        .route("/chat", post(conversations::chat))
        .route("/conversations", get(conversations::list))
        .route(
            "/conversations/:id",
            delete(conversations::delete),
        )
        .route("/conversations/:id/messages", get(conversations::messages))
        .route("/events/task-completed", post(events::task_completed))
        .route("/events/reminder-due", post(events::reminder_due))
        .with_state(state)
}

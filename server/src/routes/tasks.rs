use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use task_core::models::{
    NewTask, Priority, Recurrence, SortDirection, SortKey, Tag, Task, TaskChanges, TaskFilter,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::double_option;
use crate::state::{AppState, OwnerScope};

#[derive(Deserialize)]
pub struct CreateTaskBody {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub remind_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Recurrence,
    pub parent_task_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct UpdateTaskBody {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub remind_at: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Recurrence>,
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    pub completed: Option<bool>,
    #[serde(default)]
    pub overdue: bool,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Deserialize)]
pub struct ReminderBody {
    pub remind_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct TagBody {
    pub name: String,
}

pub async fn create(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let new_task = NewTask {
        owner_id: owner,
        title: body.title,
        description: body.description,
        priority: body.priority,
        due_at: body.due_at,
        remind_at: body.remind_at,
        recurrence: body.recurrence,
        parent_task_id: body.parent_task_id,
        tags: body.tags,
    };
    let task = state.tasks.create_task(owner, new_task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = TaskFilter {
        priority: query.priority,
        tag: query.tag,
        completed: query.completed,
        overdue: query.overdue,
        sort: query.sort,
        direction: query.direction,
    };
    Ok(Json(state.tasks.list_tasks(owner, &filter).await?))
}

pub async fn search(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.tasks.search_tasks(owner, &query.q).await?))
}

pub async fn get(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get_task(owner, id).await?))
}

pub async fn update(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<Task>, ApiError> {
    let changes = TaskChanges {
        title: body.title,
        description: body.description,
        priority: body.priority,
        due_at: body.due_at,
        remind_at: body.remind_at,
        recurrence: body.recurrence,
    };
    Ok(Json(state.tasks.update_task(owner, id, changes).await?))
}

pub async fn delete(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.tasks.delete_task(owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.toggle_complete(owner, id).await?))
}

pub async fn set_reminder(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReminderBody>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.set_reminder(owner, id, body.remind_at).await?))
}

pub async fn add_tag(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TagBody>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.add_tag(owner, id, &body.name).await?))
}

pub async fn remove_tag(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.remove_tag(owner, id, &name).await?))
}

pub async fn list_tags(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.tasks.list_tags(owner).await?))
}

pub async fn delete_tag(
    OwnerScope(owner): OwnerScope,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.tasks.delete_tag(owner, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

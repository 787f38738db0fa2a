//! The agent's bounded tool surface.
//!
//! Tools are a static registry known at build time: name, argument schema,
//! and a dispatch arm mapping one-to-one onto a TaskCore operation. The
//! language model is told only about entries in this registry, and the
//! dispatcher refuses anything else. Every dispatch runs with the turn's
//! user principal; escalation is structurally impossible.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use task_core::{
    clients::{ToolCall, ToolSpec},
    error::{CoreError, Result},
    models::{NewTask, Priority, Recurrence, SortDirection, SortKey, TaskChanges, TaskFilter},
    service::TaskService,
};
use uuid::Uuid;

use crate::dates::resolve_date;

/// Names of every permitted tool, in registry order.
pub const TOOL_NAMES: &[&str] = &[
    "add_task",
    "list_tasks",
    "filter_by_priority",
    "filter_by_tag",
    "show_overdue",
    "search_tasks",
    "combined_filter",
    "sort_tasks",
    "complete_task",
    "update_task",
    "set_priority",
    "set_due_date",
    "set_recurrence",
    "delete_task",
    "add_tag",
    "remove_tag",
    "set_reminder",
];

/// Whether `name` is part of the permitted surface.
pub fn is_known_tool(name: &str) -> bool {
    TOOL_NAMES.contains(&name)
}

/// Declarations handed to the language model.
pub fn tool_specs() -> Vec<ToolSpec> {
    let priority = json!({"type": "string", "enum": ["low", "medium", "high"]});
    let recurrence = json!({"type": "string", "enum": ["none", "daily", "weekly", "monthly"]});
    let date = json!({
        "type": "string",
        "description": "A date: RFC 3339, YYYY-MM-DD, 'today', 'tomorrow', 'next friday', 'in 3 days', ..."
    });
    let task_id = json!({"type": "string", "description": "Task id in hyphenated form"});

    vec![
        spec(
            "add_task",
            "Create a new task",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "priority": priority,
                    "due_date": date,
                    "recurrence": recurrence,
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["title"],
                "additionalProperties": false
            }),
        ),
        spec(
            "list_tasks",
            "List all tasks",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        ),
        spec(
            "filter_by_priority",
            "List tasks with a given priority",
            json!({
                "type": "object",
                "properties": {"priority": priority},
                "required": ["priority"],
                "additionalProperties": false
            }),
        ),
        spec(
            "filter_by_tag",
            "List tasks carrying a tag",
            json!({
                "type": "object",
                "properties": {"tag": {"type": "string"}},
                "required": ["tag"],
                "additionalProperties": false
            }),
        ),
        spec(
            "show_overdue",
            "List open tasks whose due date has passed",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        ),
        spec(
            "search_tasks",
            "Search tasks by substring over title and description",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"],
                "additionalProperties": false
            }),
        ),
        spec(
            "combined_filter",
            "List tasks matching several predicates at once",
            json!({
                "type": "object",
                "properties": {
                    "priority": priority,
                    "tag": {"type": "string"},
                    "completed": {"type": "boolean"},
                    "overdue": {"type": "boolean"}
                },
                "additionalProperties": false
            }),
        ),
        spec(
            "sort_tasks",
            "List all tasks in a given order",
            json!({
                "type": "object",
                "properties": {
                    "sort_by": {"type": "string", "enum": ["created_at", "updated_at", "due_at", "priority", "title"]},
                    "direction": {"type": "string", "enum": ["asc", "desc"]}
                },
                "required": ["sort_by"],
                "additionalProperties": false
            }),
        ),
        spec(
            "complete_task",
            "Toggle a task's completion, by id or by unique title match",
            json!({
                "type": "object",
                "properties": {
                    "task_id": task_id,
                    "title": {"type": "string", "description": "Case-insensitive title fragment; must match exactly one task"}
                },
                "additionalProperties": false
            }),
        ),
        spec(
            "update_task",
            "Change a task's title or description",
            json!({
                "type": "object",
                "properties": {
                    "task_id": task_id,
                    "title": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["task_id"],
                "additionalProperties": false
            }),
        ),
        spec(
            "set_priority",
            "Change a task's priority",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "priority": priority},
                "required": ["task_id", "priority"],
                "additionalProperties": false
            }),
        ),
        spec(
            "set_due_date",
            "Set or change a task's due date",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "due_date": date},
                "required": ["task_id", "due_date"],
                "additionalProperties": false
            }),
        ),
        spec(
            "set_recurrence",
            "Change a task's recurrence policy",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "recurrence": recurrence},
                "required": ["task_id", "recurrence"],
                "additionalProperties": false
            }),
        ),
        spec(
            "delete_task",
            "Delete a task",
            json!({
                "type": "object",
                "properties": {"task_id": task_id},
                "required": ["task_id"],
                "additionalProperties": false
            }),
        ),
        spec(
            "add_tag",
            "Attach a tag to a task",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "tag": {"type": "string"}},
                "required": ["task_id", "tag"],
                "additionalProperties": false
            }),
        ),
        spec(
            "remove_tag",
            "Remove a tag from a task",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "tag": {"type": "string"}},
                "required": ["task_id", "tag"],
                "additionalProperties": false
            }),
        ),
        spec(
            "set_reminder",
            "Schedule a reminder for a task",
            json!({
                "type": "object",
                "properties": {"task_id": task_id, "remind_at": date},
                "required": ["task_id", "remind_at"],
                "additionalProperties": false
            }),
        ),
    ]
}

fn spec(name: &str, description: &str, parameters: Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddTaskArgs {
    title: String,
    description: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
    recurrence: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyArgs {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PriorityArgs {
    priority: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TagFilterArgs {
    tag: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CombinedFilterArgs {
    priority: Option<String>,
    tag: Option<String>,
    completed: Option<bool>,
    overdue: Option<bool>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SortArgs {
    sort_by: String,
    direction: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CompleteArgs {
    task_id: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateArgs {
    task_id: String,
    title: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetPriorityArgs {
    task_id: String,
    priority: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDueDateArgs {
    task_id: String,
    due_date: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetRecurrenceArgs {
    task_id: String,
    recurrence: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskTagArgs {
    task_id: String,
    tag: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetReminderArgs {
    task_id: String,
    remind_at: String,
}

/// Dispatches validated tool calls against TaskCore with one fixed owner.
pub struct ToolDispatcher {
    service: TaskService,
    owner: Uuid,
}

impl ToolDispatcher {
    pub fn new(service: TaskService, owner: Uuid) -> Self {
        Self { service, owner }
    }

    /// Validate arguments and invoke the corresponding TaskCore operation.
    ///
    /// Unknown tool names are refused before any argument parsing; the
    /// caller is expected to have already checked [`is_known_tool`] and to
    /// end the turn on a violation.
    pub async fn dispatch(&self, call: &ToolCall, now: DateTime<Utc>) -> Result<Value> {
        if !is_known_tool(&call.name) {
            return Err(CoreError::Validation(format!(
                "tool '{}' is not part of the permitted surface",
                call.name
            )));
        }
        tracing::debug!(tool = %call.name, owner_id = %self.owner, "Dispatching tool call");

        match call.name.as_str() {
            "add_task" => {
                let args: AddTaskArgs = parse_args(call)?;
                let mut new_task = NewTask::new(self.owner, args.title);
                new_task.description = args.description;
                if let Some(priority) = args.priority.as_deref() {
                    new_task.priority = parse_priority(priority)?;
                }
                if let Some(due) = args.due_date.as_deref() {
                    new_task.due_at = Some(resolve_date(due, now)?);
                }
                if let Some(recurrence) = args.recurrence.as_deref() {
                    new_task.recurrence = parse_recurrence(recurrence)?;
                }
                new_task.tags = args.tags;
                let task = self.service.create_task(self.owner, new_task).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "list_tasks" => {
                let _: EmptyArgs = parse_args(call)?;
                self.list(TaskFilter::default()).await
            }
            "filter_by_priority" => {
                let args: PriorityArgs = parse_args(call)?;
                self.list(TaskFilter {
                    priority: Some(parse_priority(&args.priority)?),
                    ..Default::default()
                })
                .await
            }
            "filter_by_tag" => {
                let args: TagFilterArgs = parse_args(call)?;
                self.list(TaskFilter { tag: Some(args.tag), ..Default::default() }).await
            }
            "show_overdue" => {
                let _: EmptyArgs = parse_args(call)?;
                self.list(TaskFilter { overdue: true, ..Default::default() }).await
            }
            "search_tasks" => {
                let args: SearchArgs = parse_args(call)?;
                let tasks = self.service.search_tasks(self.owner, &args.query).await?;
                Ok(serde_json::to_value(tasks).unwrap_or(Value::Null))
            }
            "combined_filter" => {
                let args: CombinedFilterArgs = parse_args(call)?;
                let priority = args.priority.as_deref().map(parse_priority).transpose()?;
                self.list(TaskFilter {
                    priority,
                    tag: args.tag,
                    completed: args.completed,
                    overdue: args.overdue.unwrap_or(false),
                    ..Default::default()
                })
                .await
            }
            "sort_tasks" => {
                let args: SortArgs = parse_args(call)?;
                self.list(TaskFilter {
                    sort: parse_sort_key(&args.sort_by)?,
                    direction: parse_direction(args.direction.as_deref())?,
                    ..Default::default()
                })
                .await
            }
            "complete_task" => {
                let args: CompleteArgs = parse_args(call)?;
                let id = self.resolve_task(args.task_id, args.title).await?;
                let task = self.service.toggle_complete(self.owner, id).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "update_task" => {
                let args: UpdateArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let changes = TaskChanges {
                    title: args.title,
                    description: args.description.map(Some),
                    ..Default::default()
                };
                let task = self.service.update_task(self.owner, id, changes).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "set_priority" => {
                let args: SetPriorityArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let changes = TaskChanges {
                    priority: Some(parse_priority(&args.priority)?),
                    ..Default::default()
                };
                let task = self.service.update_task(self.owner, id, changes).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "set_due_date" => {
                let args: SetDueDateArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let changes = TaskChanges {
                    due_at: Some(Some(resolve_date(&args.due_date, now)?)),
                    ..Default::default()
                };
                let task = self.service.update_task(self.owner, id, changes).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "set_recurrence" => {
                let args: SetRecurrenceArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let changes = TaskChanges {
                    recurrence: Some(parse_recurrence(&args.recurrence)?),
                    ..Default::default()
                };
                let task = self.service.update_task(self.owner, id, changes).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "delete_task" => {
                let args: TaskIdArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                self.service.delete_task(self.owner, id).await?;
                Ok(json!({"deleted": true, "taskId": id}))
            }
            "add_tag" => {
                let args: TaskTagArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let task = self.service.add_tag(self.owner, id, &args.tag).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "remove_tag" => {
                let args: TaskTagArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let task = self.service.remove_tag(self.owner, id, &args.tag).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            "set_reminder" => {
                let args: SetReminderArgs = parse_args(call)?;
                let id = parse_task_id(&args.task_id)?;
                let remind_at = resolve_date(&args.remind_at, now)?;
                let task = self.service.set_reminder(self.owner, id, remind_at).await?;
                Ok(serde_json::to_value(task).unwrap_or(Value::Null))
            }
            _ => unreachable!("guarded by is_known_tool"),
        }
    }

    async fn list(&self, filter: TaskFilter) -> Result<Value> {
        let tasks = self.service.list_tasks(self.owner, &filter).await?;
        Ok(serde_json::to_value(tasks).unwrap_or(Value::Null))
    }

    /// Resolve a task reference given by id or by title fragment. A title
    /// fragment must match exactly one task; anything else asks the model
    /// to disambiguate.
    async fn resolve_task(
        &self,
        task_id: Option<String>,
        title: Option<String>,
    ) -> Result<Uuid> {
        if let Some(raw) = task_id {
            return parse_task_id(&raw);
        }
        let Some(fragment) = title else {
            return Err(CoreError::Validation(
                "complete_task needs either task_id or title".to_string(),
            ));
        };

        let folded = fragment.trim().to_lowercase();
        if folded.is_empty() {
            return Err(CoreError::empty_field("title"));
        }

        let tasks = self
            .service
            .list_tasks(self.owner, &TaskFilter::default())
            .await?;
        let matches: Vec<_> = tasks
            .iter()
            .filter(|t| t.title.to_lowercase().contains(&folded))
            .collect();

        match matches.as_slice() {
            [] => Err(CoreError::task_not_found()),
            [task] => Ok(task.id),
            many => Err(CoreError::Validation(format!(
                "'{fragment}' matches several tasks ({}); ask the user which one they mean",
                many.iter()
                    .map(|t| t.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T> {
    serde_json::from_value(call.arguments.clone()).map_err(|e| {
        CoreError::Validation(format!("invalid arguments for {}: {e}", call.name))
    })
}

fn parse_task_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| CoreError::Validation(format!("invalid task id: '{raw}'")))
}

fn parse_priority(raw: &str) -> Result<Priority> {
    Priority::parse(raw)
        .ok_or_else(|| CoreError::Validation(format!("invalid priority: '{raw}'")))
}

fn parse_recurrence(raw: &str) -> Result<Recurrence> {
    Recurrence::parse(raw)
        .ok_or_else(|| CoreError::Validation(format!("invalid recurrence: '{raw}'")))
}

fn parse_sort_key(raw: &str) -> Result<SortKey> {
    match raw {
        "created_at" => Ok(SortKey::CreatedAt),
        "updated_at" => Ok(SortKey::UpdatedAt),
        "due_at" => Ok(SortKey::DueAt),
        "priority" => Ok(SortKey::Priority),
        "title" => Ok(SortKey::Title),
        _ => Err(CoreError::Validation(format!("invalid sort key: '{raw}'"))),
    }
}

fn parse_direction(raw: Option<&str>) -> Result<SortDirection> {
    match raw {
        None | Some("asc") => Ok(SortDirection::Asc),
        Some("desc") => Ok(SortDirection::Desc),
        Some(other) => Err(CoreError::Validation(format!(
            "invalid sort direction: '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_and_specs_agree() {
        let specs = tool_specs();
        assert_eq!(specs.len(), TOOL_NAMES.len());
        for spec in &specs {
            assert!(is_known_tool(&spec.name), "spec without registry entry");
        }
        assert!(!is_known_tool("drop_all_tables"));
        assert!(!is_known_tool("bulk_delete"));
    }

    #[test]
    fn test_every_spec_declares_closed_schema() {
        for spec in tool_specs() {
            assert_eq!(
                spec.parameters["additionalProperties"],
                serde_json::json!(false),
                "tool {} accepts unknown fields",
                spec.name
            );
        }
    }

    #[test]
    fn test_scalar_parsers() {
        assert!(parse_task_id("not-a-uuid").is_err());
        assert!(parse_task_id(&Uuid::new_v4().to_string()).is_ok());
        assert!(parse_priority("urgent").is_err());
        assert_eq!(parse_priority("high").unwrap(), Priority::High);
        assert!(parse_recurrence("yearly").is_err());
        assert_eq!(parse_sort_key("due_at").unwrap(), SortKey::DueAt);
        assert!(parse_sort_key("id").is_err());
        assert_eq!(parse_direction(None).unwrap(), SortDirection::Asc);
        assert!(parse_direction(Some("sideways")).is_err());
    }
}

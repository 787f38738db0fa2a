use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use task_core::events::{EventEnvelope, HandlerOutcome};

use crate::state::AppState;

/// Map a handler outcome to the subscription-endpoint contract: success
/// acknowledges, a retryable status triggers redelivery, and a permanent
/// status discards the event.
fn outcome_response(outcome: HandlerOutcome) -> (StatusCode, Json<serde_json::Value>) {
    match outcome {
        HandlerOutcome::Ack => (StatusCode::OK, Json(json!({"status": "ack"}))),
        HandlerOutcome::Retry => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "retry"})),
        ),
        HandlerOutcome::Drop => (StatusCode::NOT_FOUND, Json(json!({"status": "drop"}))),
    }
}

/// Delivery endpoint for the `task-events` topic.
pub async fn task_completed(
    State(state): State<AppState>,
    Json(envelope): Json<EventEnvelope>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(worker) = &state.recurrence else {
        // consumer disabled: acknowledge so the bus does not spin
        tracing::debug!(event_id = %envelope.event_id, "Recurrence consumer disabled; acknowledging");
        return (StatusCode::OK, Json(json!({"status": "disabled"})));
    };
    outcome_response(worker.handle(&envelope).await)
}

/// Delivery endpoint for the `reminders` topic.
pub async fn reminder_due(
    State(state): State<AppState>,
    Json(envelope): Json<EventEnvelope>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(worker) = &state.notification else {
        tracing::debug!(event_id = %envelope.event_id, "Notification consumer disabled; acknowledging");
        return (StatusCode::OK, Json(json!({"status": "disabled"})));
    };
    outcome_response(worker.handle(&envelope).await)
}

/// Liveness and store reachability probe.
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.tasks.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": true,
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "database": false})),
            )
        }
    }
}

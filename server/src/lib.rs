//! Server assembly for the task platform.
//!
//! Wires the SQLite store, the TaskCore service, the agent runner, and the
//! event consumers into one [`state::AppState`] and exposes the HTTP route
//! table. The binary in `main.rs` adds configuration, telemetry, background
//! loops, and graceful shutdown on top.

pub mod bus;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use agent::{AgentConfig, AgentRunner};
use anyhow::Result;
use database::SqliteStore;
use task_core::{
    auth::{AuthService, KdfConfig, TokenCodec},
    clients::{EmailSender, LlmClient},
    service::TaskService,
};
use workers::{NotificationWorker, RecurrenceWorker};

use crate::config::Config;
use crate::state::AppState;

/// Assemble the application state from configuration and the store plus the
/// outbound capabilities (injected so tests can pass doubles).
pub fn assemble(
    config: &Config,
    store: Arc<SqliteStore>,
    llm: Arc<dyn LlmClient>,
    email: Arc<dyn EmailSender>,
) -> Result<AppState> {
    let tokens = TokenCodec::new(
        config.auth.signing_secret.clone(),
        chrono::Duration::hours(config.auth.token_ttl_hours),
    );
    let kdf = KdfConfig {
        memory_kib: config.auth.kdf_memory_kib,
        iterations: config.auth.kdf_iterations,
        parallelism: config.auth.kdf_parallelism,
    };

    let auth = AuthService::new(store.clone(), tokens.clone(), kdf);
    let tasks = TaskService::new(store.clone(), store.clone());

    let runner = AgentRunner::new(
        tasks.clone(),
        store.clone(),
        llm,
        AgentConfig {
            max_tool_iterations: config.agent.max_tool_iterations,
            turn_timeout: std::time::Duration::from_secs(config.agent.turn_timeout_seconds),
        },
    );

    let recurrence = config
        .workers
        .recurrence_enabled
        .then(|| Arc::new(RecurrenceWorker::new(tasks.clone(), store.clone())));
    let notification = config
        .workers
        .notification_enabled
        .then(|| Arc::new(NotificationWorker::new(store.clone(), email)));

    Ok(AppState {
        auth,
        tasks,
        conversations: store,
        runner,
        tokens,
        recurrence,
        notification,
    })
}

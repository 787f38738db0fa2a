use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::{Config, LogFormat, LoggingConfig};

/// Per-target verbosity appended to the configured level. The scheduler and
/// outbox loops log every sweep at the app level; without these caps the
/// sqlx statement log and hyper connection churn drown them out.
const TARGET_DIRECTIVES: &str = "sqlx=warn,hyper=warn,tower_http=info,lettre=warn";

/// Initialize the tracing subscriber for logging and telemetry.
///
/// `RUST_LOG` wins outright when set; otherwise the configured level applies
/// to taskloom's own targets with the dependency caps above.
pub fn init_telemetry(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},{TARGET_DIRECTIVES}", config.level)))
        .context("Invalid log level configuration")?;

    let registry = Registry::default().with(env_filter);

    match config.format {
        // local development: file/line for jump-to-source; thread ids are
        // noise here since units of work are tasks, not threads
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true);

            registry.with(fmt_layer).init();
        }
        // log aggregation: one flat object per line; the span list carries
        // the event-id / task-id context the workers attach
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_span_list(true)
                .flatten_event(true);

            registry.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer().compact().with_target(true);

            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(
        log_level = %config.level,
        log_format = ?config.format,
        target_directives = TARGET_DIRECTIVES,
        "Telemetry initialized"
    );

    Ok(())
}

/// Log server startup information
pub fn log_startup_info(config: &Config) {
    tracing::info!(
        server_address = %config.server_address(),
        database_url = %config.database_url(),
        max_connections = config.database.max_connections,
        scheduler_tick_secs = config.scheduler.tick_seconds,
        event_bus_enabled = config.event_bus.enabled,
        recurrence_enabled = config.workers.recurrence_enabled,
        notification_enabled = config.workers.notification_enabled,
        "Server starting up"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        // tracing can only be initialized once per process, so this only
        // exercises configuration shapes
        let configs = vec![
            LoggingConfig { level: "info".to_string(), format: LogFormat::Pretty },
            LoggingConfig { level: "debug".to_string(), format: LogFormat::Json },
            LoggingConfig { level: "warn".to_string(), format: LogFormat::Compact },
        ];
        for config in configs {
            assert!(matches!(
                config.format,
                LogFormat::Pretty | LogFormat::Json | LogFormat::Compact
            ));
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use agent::HttpLlmClient;
use anyhow::{Context, Result};
use clap::Parser;
use database::SqliteStore;
use task_core::events::{EventBus, NoopEventBus};
use taskloom_server::bus::HttpEventBus;
use taskloom_server::config::Config;
use taskloom_server::telemetry::{init_telemetry, log_startup_info};
use taskloom_server::{assemble, routes};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use workers::{OutboxPublisher, ReminderScheduler, SmtpEmailSender};

#[derive(Parser)]
#[command(name = "taskloom")]
#[command(about = "Event-driven task management platform")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Port to listen on (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,

    /// Database URL override
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Listen address override
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_file) => Config::from_file(config_file)?,
        None => Config::from_env()?,
    };

    if let Some(database_url) = &cli.database_url {
        config.database.url = Some(database_url.clone());
    }
    if let Some(listen_addr) = &cli.listen_addr {
        config.server.listen_addr = listen_addr.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(log_level) = &cli.log_level {
        config.logging.level = log_level.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_telemetry(&config.logging)?;
    config.validate().context("Configuration validation failed")?;
    log_startup_info(&config);

    // store
    let store = Arc::new(
        SqliteStore::with_options(
            &config.database_url(),
            config.database.max_connections,
            Duration::from_secs(config.database.connection_timeout),
        )
        .await
        .context("Failed to open database")?,
    );
    store.migrate().await.context("Migration failed")?;

    // outbound capabilities
    let bus: Arc<dyn EventBus> = if config.event_bus.enabled {
        Arc::new(HttpEventBus::new(&config.event_bus.sidecar_url)?)
    } else {
        info!("Event bus disabled; publishes are no-ops");
        Arc::new(NoopEventBus)
    };
    let llm = Arc::new(HttpLlmClient::new(
        &config.agent.llm_base_url,
        &config.agent.llm_model,
        &config.agent.llm_api_key,
        Duration::from_secs(60),
        config.agent.llm_max_in_flight,
    )?);
    let email = Arc::new(SmtpEmailSender::new(
        &config.email.smtp_host,
        config.email.smtp_port,
        &config.email.username,
        &config.email.password,
        &config.email.from_address,
    )?);

    let state = assemble(&config, store.clone(), llm, email)?;

    // background loops share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = ReminderScheduler::new(
        store.clone(),
        bus.clone(),
        Duration::from_secs(config.scheduler.tick_seconds),
        config.scheduler.batch_size,
    );
    let scheduler_rx = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_rx).await });

    let publisher = OutboxPublisher::new(store.clone(), bus.clone(), Duration::from_secs(2), 100);
    let publisher_rx = shutdown_rx.clone();
    let publisher_handle = tokio::spawn(async move { publisher.run(publisher_rx).await });

    // HTTP surface
    let mut app = routes::router(state).layer(TraceLayer::new_for_http());
    if !config.cors.origins.is_empty() {
        let origins = config
            .cors
            .origins
            .iter()
            .map(|origin| origin.parse::<axum::http::HeaderValue>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Invalid CORS origin")?;
        app = app.layer(CorsLayer::new().allow_origin(origins).allow_headers(tower_http::cors::Any));
    }

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(address = %address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // stop background loops and let them finish their current pass
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    if let Err(e) = publisher_handle.await {
        error!(error = %e, "Outbox publisher task panicked");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

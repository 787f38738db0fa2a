use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub workers: WorkersConfig,
    pub event_bus: EventBusConfig,
    pub agent: AgentSettings,
    pub email: EmailConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Listen address for the HTTP server
    pub listen_addr: String,
    /// Port number to listen on
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Optional database URL. If not provided, defaults to a per-user path
    pub url: Option<String>,
    /// Maximum number of database connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// HMAC key for bearer credentials; shared with trusted workers
    pub signing_secret: String,
    /// Credential expiry in hours
    pub token_ttl_hours: i64,
    /// Argon2id memory cost in KiB
    pub kdf_memory_kib: u32,
    /// Argon2id iteration count
    pub kdf_iterations: u32,
    /// Argon2id lane count
    pub kdf_parallelism: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    /// Sweep period for the reminder scheduler, in seconds
    pub tick_seconds: u64,
    /// Max reminder rows claimed per sweep
    pub batch_size: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkersConfig {
    /// Enables the recurrence consumer; the core functions without it
    pub recurrence_enabled: bool,
    /// Enables the notification consumer
    pub notification_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventBusConfig {
    /// When false, event publishes are no-ops and the recurrence/reminder
    /// pipelines degrade gracefully
    pub enabled: bool,
    /// Base URL of the pub/sub sidecar
    pub sidecar_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentSettings {
    /// Bound on the planning loop per turn
    pub max_tool_iterations: u32,
    /// Turn-level deadline in seconds
    pub turn_timeout_seconds: u64,
    /// Chat-completions endpoint base URL
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: String,
    /// Bounded in-flight count against the model endpoint
    pub llm_max_in_flight: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    /// Permitted caller origins at the HTTP edge; empty means same-origin
    pub origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables and config files
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Start with default configuration
        builder = builder.add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        // Add config file if specified
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        // Add environment variable overrides with TASKLOOM__ prefix, e.g.
        // TASKLOOM__AUTH__SIGNING_SECRET
        builder = builder.add_source(
            Environment::with_prefix("TASKLOOM")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Self::apply_standard_env_vars(&mut result);

        Ok(result)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("TASKLOOM")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")?;

        Self::apply_standard_env_vars(&mut result);

        Ok(result)
    }

    /// Apply standard environment variables (DATABASE_URL, LISTEN_ADDR,
    /// LOG_LEVEL, SIGNING_SECRET) for compatibility with common deployment
    /// patterns
    fn apply_standard_env_vars(config: &mut Config) {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }

        if let Ok(listen_addr) = env::var("LISTEN_ADDR") {
            config.server.listen_addr = listen_addr;
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }

        if let Ok(secret) = env::var("SIGNING_SECRET") {
            config.auth.signing_secret = secret;
        }
    }

    /// Get the database URL with a per-user default fallback
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => Self::default_database_url(),
        }
    }

    /// Default database location, preferring XDG_DATA_HOME for containers
    pub fn default_database_url() -> String {
        if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
            return format!("sqlite://{xdg_data}/taskloom/taskloom.sqlite");
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        format!("sqlite://{home}/taskloom.sqlite")
    }

    /// Get the server socket address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.listen_addr, self.server.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ));
            }
        }

        let database_url = self.database_url();
        if !database_url.starts_with("sqlite://") && !database_url.starts_with(":memory:") {
            return Err(anyhow::anyhow!(
                "Only SQLite databases are supported. URL must start with 'sqlite://'. Got: {database_url}"
            ));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "Database max_connections must be greater than 0"
            ));
        }

        if self.auth.signing_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "auth.signing_secret must be set and at least 32 bytes"
            ));
        }

        if self.auth.token_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("auth.token_ttl_hours must be positive"));
        }

        if self.scheduler.tick_seconds == 0 || self.scheduler.batch_size == 0 {
            return Err(anyhow::anyhow!(
                "scheduler tick and batch size must be greater than 0"
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(anyhow::anyhow!("agent.max_tool_iterations must be greater than 0"));
        }

        if self.event_bus.enabled && !self.event_bus.sidecar_url.starts_with("http") {
            return Err(anyhow::anyhow!(
                "event_bus.sidecar_url must be an http(s) URL when the bus is enabled"
            ));
        }

        Ok(())
    }
}

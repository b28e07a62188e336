use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Process-wide configuration, populated once at startup.
///
/// Values come from three layers, later ones winning: compiled-in defaults,
/// an optional YAML file, and environment variable overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub task: TaskConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port for the HTTP collaborator.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            database: "wasmq".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing key for the auth collaborator.
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".into(),
        }
    }
}

/// Queue lifecycle tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Processing deadline before a claimed task is considered stale.
    pub timeout_seconds: u64,
    /// Maximum attempts after the first; total attempts = max_retries + 1.
    pub max_retries: u32,
    /// Reclaim sweep period.
    pub stale_check_interval_seconds: u64,
}

impl TaskConfig {
    /// Processing deadline as the duration type the queue engine takes.
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_seconds as i64)
    }

    /// Sweep period as the duration type the reclaim loop takes.
    pub fn stale_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_check_interval_seconds)
    }

    /// Retry policy derived from `max_retries`.
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::new(self.max_retries)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            max_retries: 3,
            stale_check_interval_seconds: 60,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Log output format selected via config or the `LOG_FORMAT` variable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` when it exists, then apply
    /// environment overrides. A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from YAML text and apply environment overrides.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parsed("SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(host) = env::var("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = env_parsed("DB_PORT") {
            self.database.port = port;
        }
        if let Ok(user) = env::var("DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = env::var("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(database) = env::var("DB_NAME") {
            self.database.database = database;
        }
        if let Some(timeout) = env_parsed("TASK_TIMEOUT_SECONDS") {
            self.task.timeout_seconds = timeout;
        }
        if let Some(retries) = env_parsed("TASK_MAX_RETRIES") {
            self.task.max_retries = retries;
        }
        if let Some(interval) = env_parsed("STALE_CHECK_INTERVAL_SECONDS") {
            self.task.stale_check_interval_seconds = interval;
        }
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => self.log.format = LogFormat::Json,
            Ok("text") => self.log.format = LogFormat::Text,
            _ => {}
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.parse().ok())
}

/// Connection pool tuning for the storage backend.
///
/// The reclaim sweeper shares this pool with the request handlers; keep
/// `max_connections` comfortably above 1 so a sweep cannot starve claims.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 300,
        }
    }
}

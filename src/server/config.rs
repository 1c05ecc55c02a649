//! Server configuration types
//!
//! Deserialized once at startup by the loader, validated, then shared
//! read-only (`Arc<AppConfig>`) with every component.

use chatty_core::{BridgeConfig, ReconnectPolicy, SqlStorageOptions};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors; all of them abort startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sources could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A required setting is absent or empty
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A setting has an unusable value
    #[error("invalid setting {field}: {message}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

/// Deployment environment (`NODE_ENV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development; cookies may be sent over plain HTTP
    Development,
    /// Production hardening applies
    Production,
    /// Automated tests
    Test,
}

impl Environment {
    /// Whether this is a production deployment
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Application configuration
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub backplane: BackplaneConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Single origin allowed by CORS, with credentials
    pub client_url: String,
    pub body_limit_bytes: usize,
    /// Subscriptions a single socket may hold
    #[serde(default = "default_max_topics_per_connection")]
    pub max_topics_per_connection: usize,
    /// Bearer token required by the HTTP emit endpoint; unset leaves it open
    #[serde(default)]
    pub api_key: Option<Secret>,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_topics_per_connection() -> usize {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Persistent storage settings
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

impl DatabaseConfig {
    /// Pool options for the storage layer
    pub fn storage_options(&self) -> SqlStorageOptions {
        SqlStorageOptions {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Backplane implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackplaneKind {
    Redis,
    /// In-process; only valid for a single server process
    Memory,
}

/// Broadcast backplane settings
#[derive(Debug, Deserialize)]
pub struct BackplaneConfig {
    pub kind: BackplaneKind,
    /// Publisher address (`REDIS_HOST`)
    pub url: String,
    /// Subscriber address; defaults to `url`
    #[serde(default)]
    pub subscriber_url: Option<String>,
    pub startup_timeout_secs: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default)]
    pub suppress_self_delivery: bool,
    pub channel_prefix: String,
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

impl BackplaneConfig {
    pub fn subscriber_url(&self) -> &str {
        self.subscriber_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.url)
    }
}

/// A secret value that never appears in logs
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Session cookie signing settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub secret_key_one: Option<Secret>,
    #[serde(default)]
    pub secret_key_two: Option<Secret>,
    #[serde(default = "default_session_max_age_hours")]
    pub max_age_hours: u64,
}

fn default_session_max_age_hours() -> u64 {
    24
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret_key_one: None,
            secret_key_two: None,
            max_age_hours: default_session_max_age_hours(),
        }
    }
}

/// Reconnect tuning shared by the bridge and the storage supervisor
#[derive(Debug, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    pub circuit_cooldown_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            circuit_cooldown_secs: 60,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
            .with_circuit_cooldown(Duration::from_secs(self.circuit_cooldown_secs))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging settings
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Unset means json in production, pretty elsewhere
    #[serde(default)]
    pub format: Option<LogFormat>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "chatty=info,chatty_core=info,tower_http=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: None,
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Bridge settings derived from the backplane and reconnect sections
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            startup_timeout: Duration::from_secs(self.backplane.startup_timeout_secs),
            publish_timeout: Duration::from_millis(self.backplane.publish_timeout_ms),
            reconnect: self.reconnect.policy(),
            suppress_self_delivery: self.backplane.suppress_self_delivery,
            channel_prefix: self.backplane.channel_prefix.clone(),
        }
    }

    /// Effective log format
    pub fn log_format(&self) -> LogFormat {
        self.logging.format.unwrap_or(if self.environment.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        })
    }

    /// Whether cookies must be marked `Secure`
    pub fn secure_cookies(&self) -> bool {
        self.environment != Environment::Development
    }
}

/// Default configuration with the required settings filled in
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    use config::{Config, File, FileFormat};

    let mut config: AppConfig = Config::builder()
        .add_source(File::from_str(super::loader::DEFAULT_CONFIG, FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();
    config.environment = Environment::Test;
    config.database.url = "sqlite::memory:".to_string();
    config.backplane.kind = BackplaneKind::Memory;
    config.session.secret_key_one = Some("first-secret-key-value".to_string().into());
    config.session.secret_key_two = Some("second-secret-key-value".to_string().into());
    config
}

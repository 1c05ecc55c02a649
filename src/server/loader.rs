//! Configuration loading
//!
//! Layers, lowest priority first: embedded defaults, optional files,
//! `CHATTY_*` environment variables, then the conventional unprefixed
//! variables shared with the rest of the deployment.

use super::config::{AppConfig, ConfigError};
use super::validation::validate_config;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Unprefixed environment variables and the keys they override
const CONVENTIONAL_VARS: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("REDIS_HOST", "backplane.url"),
    ("SECRET_KEY_ONE", "session.secret_key_one"),
    ("SECRET_KEY_TWO", "session.secret_key_two"),
    ("CLIENT_URL", "server.client_url"),
    ("NODE_ENV", "environment"),
    ("PORT", "server.port"),
    ("API_KEY", "server.api_key"),
];

/// Load and validate configuration from files and the process environment
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(std::env::vars().collect())
}

/// Load and validate configuration using `vars` in place of the process environment
pub(crate) fn load_config_from(vars: HashMap<String, String>) -> Result<AppConfig, ConfigError> {
    let profile = vars
        .get("CHATTY_ENV")
        .or_else(|| vars.get("NODE_ENV"))
        .cloned()
        .unwrap_or_else(|| "development".to_string());

    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", profile)).required(false))
        .add_source(File::with_name("config/local").required(false))
        // 3. Prefixed environment variables, CHATTY_SERVER__PORT style
        .add_source(
            Environment::with_prefix("CHATTY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

    // 4. Conventional variables win over everything else
    for (var, key) in CONVENTIONAL_VARS {
        let value = vars.get(*var).filter(|v| !v.is_empty()).cloned();
        builder = builder.set_override_option(*key, value)?;
    }

    let config: AppConfig = builder.build()?.try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}

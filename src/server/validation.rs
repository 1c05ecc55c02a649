//! Configuration validation
//!
//! Hard requirements fail startup; production hardening gaps only warn.

use super::config::{AppConfig, BackplaneKind, ConfigError};
use tracing::warn;

/// Shortest accepted session-signing secret
const MIN_SECRET_LEN: usize = 16;

/// Validate required settings; called by the loader before the config is returned
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.database.url.trim().is_empty() {
        return Err(ConfigError::Missing("DATABASE_URL"));
    }

    if config.backplane.kind == BackplaneKind::Redis && config.backplane.url.trim().is_empty() {
        return Err(ConfigError::Missing("REDIS_HOST"));
    }

    if config.backplane.kind == BackplaneKind::Memory && config.environment.is_production() {
        return Err(ConfigError::Invalid {
            field: "backplane.kind",
            message: "the memory backplane cannot fan out across processes".to_string(),
        });
    }

    validate_session_secrets(config)?;

    let client_url = config.server.client_url.trim();
    if client_url.is_empty() {
        return Err(ConfigError::Missing("CLIENT_URL"));
    }
    if !(client_url.starts_with("http://") || client_url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            field: "CLIENT_URL",
            message: format!("'{}' is not an http(s) origin", client_url),
        });
    }

    if config.server.port == 0 {
        return Err(ConfigError::Invalid {
            field: "PORT",
            message: "port 0 is not allowed".to_string(),
        });
    }

    if config.server.max_topics_per_connection == 0 {
        return Err(ConfigError::Invalid {
            field: "server.max_topics_per_connection",
            message: "must be at least 1".to_string(),
        });
    }

    if config.server.api_key.as_ref().is_some_and(|k| k.expose_secret().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "API_KEY",
            message: "must not be empty when set".to_string(),
        });
    }

    if config.backplane.channel_prefix.is_empty() {
        return Err(ConfigError::Invalid {
            field: "backplane.channel_prefix",
            message: "must not be empty".to_string(),
        });
    }

    Ok(())
}

fn validate_session_secrets(config: &AppConfig) -> Result<(), ConfigError> {
    let one = config
        .session
        .secret_key_one
        .as_ref()
        .map(|s| s.expose_secret())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Missing("SECRET_KEY_ONE"))?;
    let two = config
        .session
        .secret_key_two
        .as_ref()
        .map(|s| s.expose_secret())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Missing("SECRET_KEY_TWO"))?;

    for (field, secret) in [("SECRET_KEY_ONE", one), ("SECRET_KEY_TWO", two)] {
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                field,
                message: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
    }

    if one == two {
        return Err(ConfigError::Invalid {
            field: "SECRET_KEY_TWO",
            message: "must differ from SECRET_KEY_ONE".to_string(),
        });
    }

    Ok(())
}

/// Log security warnings for production deployments
pub fn warn_production_config(config: &AppConfig) {
    if !config.environment.is_production() {
        return;
    }

    if config.server.client_url.starts_with("http://") {
        warn!(
            "SECURITY WARNING: CLIENT_URL uses plain HTTP in production. \
             Session cookies are marked Secure and will not be sent."
        );
    }

    if config.backplane.url.starts_with("redis://") && !config.backplane.url.contains('@') {
        warn!(
            "SECURITY WARNING: Redis connection appears to have no authentication in production. \
             Consider enabling Redis AUTH."
        );
    }

    if config.database.url.starts_with("sqlite:") {
        warn!(
            "SECURITY WARNING: SQLite storage in production cannot be shared between processes."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::{test_config, Environment};

    fn base_config() -> AppConfig {
        let mut config = test_config();
        config.database.url = "postgres://localhost/chatty".to_string();
        config.backplane.kind = BackplaneKind::Redis;
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_missing_secret() {
        let mut config = base_config();
        config.session.secret_key_two = None;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing("SECRET_KEY_TWO"))
        ));
    }

    #[test]
    fn test_short_secret() {
        let mut config = base_config();
        config.session.secret_key_one = Some("short".to_string().into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid {
                field: "SECRET_KEY_ONE",
                ..
            })
        ));
    }

    #[test]
    fn test_identical_secrets() {
        let mut config = base_config();
        config.session.secret_key_two = config.session.secret_key_one.clone();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid {
                field: "SECRET_KEY_TWO",
                ..
            })
        ));
    }

    #[test]
    fn test_client_url_must_be_http() {
        let mut config = base_config();
        config.server.client_url = "localhost:3000".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid {
                field: "CLIENT_URL",
                ..
            })
        ));
    }

    #[test]
    fn test_memory_backplane_refused_in_production() {
        let mut config = base_config();
        config.backplane.kind = BackplaneKind::Memory;
        assert!(validate_config(&config).is_ok());

        config.environment = Environment::Production;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_topic_cap_must_be_positive() {
        let mut config = base_config();
        config.server.max_topics_per_connection = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid {
                field: "server.max_topics_per_connection",
                ..
            })
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let config = base_config();
        let debug = format!("{:?}", config.session);
        assert!(!debug.contains("first-secret-key-value"));
    }
}

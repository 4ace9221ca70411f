use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation. Values layer from
/// `config/default.toml`, an environment-specific file, and `APP__*`
/// environment variables, the last one winning.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Deployment environment name (development, test, production)
    #[serde(default = "default_env")]
    pub environment: String,

    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bound of the in-process domain event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Maximum pooled database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

impl AppConfig {
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
            db_max_connections: default_db_max_connections(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration files plus `APP__`-prefixed environment overrides
/// (e.g. `APP__DATABASE_URL`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let mut builder = Config::builder();
    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }
    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        assert_eq!(cfg.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(cfg.event_buffer, DEFAULT_EVENT_BUFFER);
        assert!(!cfg.is_production());
    }
}

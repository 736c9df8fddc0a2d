//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable selecting development/production.
pub const ENV_ENVIRONMENT: &str = "APP_ENVIRONMENT";
/// Environment variable overriding the listener address.
pub const ENV_BIND_ADDRESS: &str = "APP_BIND_ADDRESS";
/// Environment variable overriding the SQLite path.
pub const ENV_DATABASE_PATH: &str = "APP_DATABASE_PATH";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {variable}: {reason}")]
    Override { variable: &'static str, reason: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    finalize(config)
}

/// Like [`load_config`], falling back to defaults when no path is given.
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => finalize(AppConfig::default()),
    }
}

fn finalize(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let config = apply_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `APP_*` overrides read through `lookup`.
pub fn apply_overrides<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_ENVIRONMENT) {
        config.observability.environment = value.parse().map_err(|reason| ConfigError::Override {
            variable: ENV_ENVIRONMENT,
            reason,
        })?;
    }
    if let Some(value) = lookup(ENV_BIND_ADDRESS) {
        config.listener.bind_address = value;
    }
    if let Some(value) = lookup(ENV_DATABASE_PATH) {
        config.database.path = value;
    }
    Ok(config)
}

//! Configuration loading from disk.
//!
//! The environment preset is serialized to a TOML tree, the operator file is
//! deep-merged over it (tables merge recursively, leaves and arrays are
//! replaced), and the merged tree is deserialized and validated.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, GuardConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable selecting the preset when the file does not.
pub const ENV_VAR: &str = "GUARD_ENV";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unknown environment: {0}")]
    Environment(String),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content)
}

/// Load and validate configuration from TOML text.
pub fn load_config_str(content: &str) -> Result<GuardConfig, ConfigError> {
    let overrides: toml::Table = toml::from_str(content)?;
    let env = match overrides.get("environment").and_then(|v| v.as_str()) {
        Some(name) => name.parse().map_err(ConfigError::Environment)?,
        None => environment_from_env()?,
    };
    build_config(env, overrides)
}

/// Preset for the environment named by `GUARD_ENV` (development if unset).
pub fn config_from_env() -> Result<GuardConfig, ConfigError> {
    let config = GuardConfig::for_environment(environment_from_env()?);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn environment_from_env() -> Result<Environment, ConfigError> {
    match std::env::var(ENV_VAR) {
        Ok(name) => name.parse().map_err(ConfigError::Environment),
        Err(_) => Ok(Environment::Development),
    }
}

fn build_config(env: Environment, overrides: toml::Table) -> Result<GuardConfig, ConfigError> {
    let mut base = toml::Table::try_from(GuardConfig::for_environment(env))?;
    deep_merge(&mut base, overrides);
    base.insert(
        "environment".to_string(),
        toml::Value::String(env.as_str().to_string()),
    );

    let config: GuardConfig = base.try_into()?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Merge `overrides` into `base`. Nested tables merge; everything else is replaced.
pub fn deep_merge(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Boot-time configuration failure. Always fatal: the server never opens a
/// socket with a configuration that produced one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("handler({0}) class not found")]
    UnknownHandler(String),

    #[error("worker({0}) class not found")]
    UnknownWorker(String),

    #[error("handler({class}) path({path}) invalid")]
    InvalidPath { class: String, path: String },

    #[error("worker({class}) name({name}) invalid")]
    InvalidName { class: String, name: String },

    #[error("worker({class}) process_number must be at least 1")]
    InvalidProcessCount { class: String },

    #[error("no handlers")]
    NoHandlers,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load the config at `path` if it exists, defaults otherwise. Runs before
/// logging is set up, so reporting a missing file is left to the caller.
pub fn load_or_default(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) if path.exists() => load_config(path),
        _ => Ok(ServerConfig::default()),
    }
}

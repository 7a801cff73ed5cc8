//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Normalize and check handler mount paths
//! - Check custom worker names
//! - Validate value ranges (process counts, capacities)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pattern checks are hand-written; no regex on the boot path
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate ranges and required values of a loaded config.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::new("host", "must not be empty"));
    }
    if config.worker_num == 0 {
        errors.push(ValidationError::new("worker_num", "must be at least 1"));
    }
    if config.max_connections == 0 {
        errors.push(ValidationError::new("max_connections", "must be at least 1"));
    }
    if config.pid_file.as_os_str().is_empty() {
        errors.push(ValidationError::new("pid_file", "must not be empty"));
    }
    for (i, worker) in config.workers.iter().enumerate() {
        if worker.process_count() == 0 {
            errors.push(ValidationError::new(
                format!("workers[{}].process_number", i),
                "must be at least 1",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Normalize a handler mount path: empty becomes `/`, otherwise a leading
/// `/` is enforced. Surrounding whitespace is ignored.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Check a normalized path against `^/(\w+/)*(\w+)?$`.
pub fn is_valid_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let (last, inner) = match segments.split_last() {
        Some(split) => split,
        None => return false,
    };
    inner
        .iter()
        .all(|s| !s.is_empty() && s.chars().all(is_word_char))
        && last.chars().all(is_word_char)
}

/// Check a trimmed worker name against `^[\w+\-.@/]+$`.
pub fn is_valid_worker_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| is_word_char(c) || matches!(c, '+' | '-' | '.' | '@' | '/'))
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → hooks attached by the embedding program
//!     → owned by the Server for the process lifetime
//! ```
//!
//! # Design Decisions
//! - Config is read once; a reload restarts workers, it does not re-read the file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{HandlerSpec, Hook, Hooks, Options, ServerConfig, WorkerSpec};
pub use validation::{is_valid_path, is_valid_worker_name, normalize_path, ValidationError};

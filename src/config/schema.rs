//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All serializable types derive Serde traits for deserialization from config
//! files. Lifecycle hooks are plain Rust closures and are attached after
//! loading.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::server::Server;

/// Free-form options passed to handlers, workers and tasks.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// A lifecycle hook invoked with the server instance.
pub type Hook = Arc<dyn Fn(&Server) + Send + Sync>;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host.
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Prefix for the title of every process in the tree.
    pub process_title: String,

    /// Where the master writes its pid.
    pub pid_file: PathBuf,

    /// Log destination once daemonized.
    pub log_file: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Detach from the terminal on start.
    pub daemonize: bool,

    /// Number of event worker processes.
    pub worker_num: usize,

    /// Number of task worker processes.
    pub task_worker_num: usize,

    /// Capacity of the shared connection table.
    pub max_connections: usize,

    /// Ordered handler list. Order decides routing precedence.
    pub handlers: Vec<HandlerSpec>,

    /// Custom worker processes.
    pub workers: Vec<WorkerSpec>,

    /// Lifecycle hooks, attached programmatically.
    #[serde(skip)]
    pub hooks: Hooks,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            process_title: "vicuna-server".to_string(),
            pid_file: PathBuf::from("/tmp/server.pid"),
            log_file: Some(PathBuf::from("/tmp/server.log")),
            log_level: "info".to_string(),
            daemonize: false,
            worker_num: 4,
            task_worker_num: 4,
            max_connections: 65_536,
            handlers: vec![HandlerSpec::class("DefaultHandler")],
            workers: Vec::new(),
            hooks: Hooks::default(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` pair the master binds.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A handler entry: either a bare class name or a table with path and options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "HandlerEntry")]
pub struct HandlerSpec {
    /// Registry key of the handler type.
    pub class: String,

    /// Mount path; falls back to the handler's own default when absent.
    pub path: Option<String>,

    /// Options handed to the handler factory.
    pub options: Options,
}

impl HandlerSpec {
    /// Entry with no path and no options.
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            path: None,
            options: Options::new(),
        }
    }

    /// Entry mounted at `path`.
    pub fn at(class: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::class(class)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HandlerEntry {
    Class(String),
    Table {
        class: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        options: Options,
    },
}

impl From<HandlerEntry> for HandlerSpec {
    fn from(entry: HandlerEntry) -> Self {
        match entry {
            HandlerEntry::Class(class) => HandlerSpec::class(class),
            HandlerEntry::Table { class, path, options } => HandlerSpec { class, path, options },
        }
    }
}

/// A custom worker entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkerSpec {
    /// Registry key of the worker type.
    pub class: String,

    /// Process name; falls back to the worker's own name, then the class.
    #[serde(default)]
    pub name: Option<String>,

    /// Options handed to the worker factory.
    #[serde(default)]
    pub options: Options,

    /// How many processes run this worker.
    #[serde(default)]
    pub process_number: Option<usize>,
}

impl WorkerSpec {
    /// Entry with no explicit name, options or process count.
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: None,
            options: Options::new(),
            process_number: None,
        }
    }

    /// Number of processes to spawn, read from the entry or its options.
    pub fn process_count(&self) -> usize {
        self.process_number
            .or_else(|| {
                self.options
                    .get("process_number")
                    .and_then(|v| v.as_u64())
                    .map(|n| n as usize)
            })
            .unwrap_or(1)
    }
}

/// Optional lifecycle hooks.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Before handlers and workers are registered.
    pub on_boot: Option<Hook>,
    /// In the master, right before the engine starts.
    pub on_init: Option<Hook>,
    /// In the master, after the pid file is written.
    pub on_start: Option<Hook>,
    /// In the master, after the pid file is removed.
    pub on_shutdown: Option<Hook>,
    /// In every event and task worker after it starts.
    pub on_worker_start: Option<Hook>,
    /// In every event and task worker before it exits.
    pub on_worker_stop: Option<Hook>,
}

impl Hooks {
    pub(crate) fn fire(hook: &Option<Hook>, server: &Server) {
        if let Some(hook) = hook {
            hook(server);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_boot", &self.on_boot.is_some())
            .field("on_init", &self.on_init.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .field("on_worker_start", &self.on_worker_start.is_some())
            .field("on_worker_stop", &self.on_worker_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address(), "0.0.0.0:8000");
        assert_eq!(config.pid_file, PathBuf::from("/tmp/server.pid"));
        assert_eq!(config.handlers, vec![HandlerSpec::class("DefaultHandler")]);
        assert_eq!(config.max_connections, 65_536);
    }

    #[test]
    fn handler_entries_accept_both_forms() {
        let config: ServerConfig = toml::from_str(
            r#"
            handlers = [
                "DefaultHandler",
                { class = "EchoHandler", path = "ws", options = { greeting = "hi" } },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.handlers[0], HandlerSpec::class("DefaultHandler"));
        assert_eq!(config.handlers[1].class, "EchoHandler");
        assert_eq!(config.handlers[1].path.as_deref(), Some("ws"));
        assert_eq!(config.handlers[1].options["greeting"], "hi");
    }

    #[test]
    fn process_count_prefers_entry_over_options() {
        let mut spec = WorkerSpec::class("Ticker");
        assert_eq!(spec.process_count(), 1);

        spec.options.insert("process_number".into(), 3.into());
        assert_eq!(spec.process_count(), 3);

        spec.process_number = Some(2);
        assert_eq!(spec.process_count(), 2);
    }
}

//! Class-name registry for handlers, workers and tasks.
//!
//! # Responsibilities
//! - Map configured class names to constructors
//! - Build the router from handler specs, validating paths
//! - Resolve and validate worker names and process counts
//! - Build task instances inside task workers
//!
//! # Design Decisions
//! - Factories receive the entry's options; nothing is set after construction
//! - All validation happens here, before any socket exists
//! - Capability checks are the type system's job: factories return trait objects

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::builtin::{DefaultHandler, EchoHandler, EchoTask};
use crate::app::{Handler, Worker};
use crate::config::{
    is_valid_path, is_valid_worker_name, normalize_path, ConfigError, HandlerSpec, Options,
    WorkerSpec,
};
use crate::routing::Router;
use crate::task::{Task, TaskError};

pub type HandlerFactory = Arc<dyn Fn(&Options) -> Box<dyn Handler> + Send + Sync>;
pub type WorkerFactory = Arc<dyn Fn(&Options) -> Box<dyn Worker> + Send + Sync>;
pub type TaskFactory = Arc<dyn Fn(&Options) -> Result<Box<dyn Task>, TaskError> + Send + Sync>;

/// A validated custom worker entry.
#[derive(Clone)]
pub struct WorkerRegistration {
    pub class: String,
    pub name: String,
    pub options: Options,
    pub process_count: usize,
    factory: WorkerFactory,
}

impl WorkerRegistration {
    /// Fresh instance for one process.
    pub fn instantiate(&self) -> Box<dyn Worker> {
        (self.factory)(&self.options)
    }

    /// Milliseconds to sleep between `run` calls.
    pub fn sleep_time_ms(&self) -> u64 {
        self.options
            .get("sleep_time")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
    }
}

impl std::fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistration")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("process_count", &self.process_count)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, HandlerFactory>,
    workers: HashMap<String, WorkerFactory>,
    tasks: HashMap<String, TaskFactory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `DefaultHandler`, `EchoHandler` and `EchoTask`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_handler("DefaultHandler", |_| Box::new(DefaultHandler))
            .register_handler("EchoHandler", |_| Box::new(EchoHandler))
            .register_task("EchoTask", |options| Ok(Box::new(EchoTask::new(options.clone()))));
        registry
    }

    pub fn register_handler<F>(&mut self, class: &str, factory: F) -> &mut Self
    where
        F: Fn(&Options) -> Box<dyn Handler> + Send + Sync + 'static,
    {
        self.handlers.insert(class.to_string(), Arc::new(factory));
        self
    }

    pub fn register_worker<F>(&mut self, class: &str, factory: F) -> &mut Self
    where
        F: Fn(&Options) -> Box<dyn Worker> + Send + Sync + 'static,
    {
        self.workers.insert(class.to_string(), Arc::new(factory));
        self
    }

    pub fn register_task<F>(&mut self, class: &str, factory: F) -> &mut Self
    where
        F: Fn(&Options) -> Result<Box<dyn Task>, TaskError> + Send + Sync + 'static,
    {
        self.tasks.insert(class.to_string(), Arc::new(factory));
        self
    }

    /// Instantiate one handler and resolve its normalized path.
    pub fn build_handler(&self, spec: &HandlerSpec) -> Result<(String, Box<dyn Handler>), ConfigError> {
        let factory = self
            .handlers
            .get(&spec.class)
            .ok_or_else(|| ConfigError::UnknownHandler(spec.class.clone()))?;
        let handler = factory(&spec.options);

        let raw = spec
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| handler.default_path());
        let path = normalize_path(raw);
        if !is_valid_path(&path) {
            return Err(ConfigError::InvalidPath {
                class: spec.class.clone(),
                path,
            });
        }
        Ok((path, handler))
    }

    /// Build the router in configuration order. Duplicate paths overwrite.
    pub fn build_router(&self, specs: &[HandlerSpec]) -> Result<Router, ConfigError> {
        let mut router = Router::new();
        for spec in specs {
            let (path, handler) = self.build_handler(spec)?;
            tracing::debug!(class = %spec.class, path = %path, "Registered handler");
            router.insert(&path, spec.options.clone(), Arc::from(handler));
        }
        Ok(router)
    }

    /// Validate one worker entry and resolve its name.
    pub fn build_worker(&self, spec: &WorkerSpec) -> Result<WorkerRegistration, ConfigError> {
        let factory = self
            .workers
            .get(&spec.class)
            .ok_or_else(|| ConfigError::UnknownWorker(spec.class.clone()))?
            .clone();

        let configured = spec.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let name = match configured {
            Some(name) => name.to_string(),
            None => {
                let probe = factory(&spec.options);
                probe
                    .name()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(&spec.class)
                    .to_string()
            }
        };
        if !is_valid_worker_name(&name) {
            return Err(ConfigError::InvalidName {
                class: spec.class.clone(),
                name,
            });
        }

        let process_count = spec.process_count();
        if process_count == 0 {
            return Err(ConfigError::InvalidProcessCount {
                class: spec.class.clone(),
            });
        }

        Ok(WorkerRegistration {
            class: spec.class.clone(),
            name,
            options: spec.options.clone(),
            process_count,
            factory,
        })
    }

    /// Validate every worker entry. A repeated name replaces the earlier entry.
    pub fn build_workers(&self, specs: &[WorkerSpec]) -> Result<Vec<WorkerRegistration>, ConfigError> {
        let mut registrations: Vec<WorkerRegistration> = Vec::with_capacity(specs.len());
        for spec in specs {
            let registration = self.build_worker(spec)?;
            match registrations.iter().position(|r| r.name == registration.name) {
                Some(index) => registrations[index] = registration,
                None => registrations.push(registration),
            }
        }
        Ok(registrations)
    }

    /// Construct a task for a task worker.
    pub fn create_task(&self, class: &str, options: &Options) -> Result<Box<dyn Task>, TaskError> {
        let factory = self
            .tasks
            .get(class)
            .ok_or_else(|| TaskError::new(format!("task({}) class not found", class)))?;
        factory(options)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        let mut workers: Vec<_> = self.workers.keys().collect();
        let mut tasks: Vec<_> = self.tasks.keys().collect();
        handlers.sort();
        workers.sort();
        tasks.sort();
        f.debug_struct("Registry")
            .field("handlers", &handlers)
            .field("workers", &workers)
            .field("tasks", &tasks)
            .finish()
    }
}

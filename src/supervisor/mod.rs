//! Custom worker supervision.
//!
//! # Responsibilities
//! - Drive one `Worker` instance per process through its phases
//! - Stop on natural completion, on error, or on SIGTERM
//! - Label the process and log its start and stop
//!
//! # Data Flow
//! ```text
//! Starting ── init() ──► Running ── run() == true / error / token ──► Stopping ──► Stopped
//!                           ▲   │
//!                           └───┘ run() == false, sleep `sleep_time` ms
//! ```
//!
//! # Design Decisions
//! - The cancellation token is polled once per iteration, before `run()`
//! - Errors and panics end only this process; the manager does not respawn it

use std::fmt;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::app::{guard, HandlerError, WorkerContext, WorkerRegistration};
use crate::lifecycle::{startup, CancelToken};
use crate::server::Server;

/// Lifecycle phase of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerPhase::Starting => "starting",
            WorkerPhase::Running => "running",
            WorkerPhase::Stopping => "stopping",
            WorkerPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Failure that ended a worker process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("init failed: {0}")]
    Init(#[source] HandlerError),

    #[error("run failed: {0}")]
    Run(#[source] HandlerError),
}

#[derive(Debug)]
pub enum StopReason {
    /// `run()` returned `true`.
    Completed,
    /// The cancellation token was set.
    Cancelled,
    Failed(ProcessError),
}

/// How a supervised worker ended.
#[derive(Debug)]
pub struct SupervisorReport {
    pub phase: WorkerPhase,
    /// Number of `run()` calls made.
    pub runs: u64,
    pub reason: StopReason,
}

/// Run one worker instance until it stops. Never panics.
pub fn supervise(
    server: &Server,
    registration: &WorkerRegistration,
    index: usize,
    token: &CancelToken,
) -> SupervisorReport {
    let ctx = WorkerContext {
        server,
        name: &registration.name,
        options: &registration.options,
        index,
    };
    let sleep = Duration::from_millis(registration.sleep_time_ms());
    let mut phase = WorkerPhase::Starting;
    let mut runs = 0u64;

    let mut worker = match guard(|| Ok(registration.instantiate())) {
        Ok(worker) => worker,
        Err(e) => return stopped(runs, StopReason::Failed(ProcessError::Init(e))),
    };
    if let Err(e) = guard(|| worker.init(&ctx)) {
        return stopped(runs, StopReason::Failed(ProcessError::Init(e)));
    }

    phase = advance(phase, WorkerPhase::Running);
    let reason = loop {
        if token.is_cancelled() {
            break StopReason::Cancelled;
        }
        runs += 1;
        match guard(|| worker.run(&ctx)) {
            Ok(true) => break StopReason::Completed,
            Ok(false) => thread::sleep(sleep),
            Err(e) => break StopReason::Failed(ProcessError::Run(e)),
        }
    };
    let _ = advance(phase, WorkerPhase::Stopping);
    stopped(runs, reason)
}

fn advance(from: WorkerPhase, to: WorkerPhase) -> WorkerPhase {
    tracing::trace!(%from, %to, "Worker phase change");
    to
}

fn stopped(runs: u64, reason: StopReason) -> SupervisorReport {
    if let StopReason::Failed(e) = &reason {
        tracing::error!(error = %e, "Worker failed");
    }
    SupervisorReport {
        phase: WorkerPhase::Stopped,
        runs,
        reason,
    }
}

/// Entry point of a custom worker process. `token` is the SIGTERM flag the
/// process inherited from the manager. Returns the exit status.
pub fn run_process(server: &Server, registration: &WorkerRegistration, index: usize, token: &CancelToken) -> i32 {
    let title = startup::process_title(
        &server.config().process_title,
        &format!("worker/{}", registration.name),
    );
    startup::set_process_title(&title);

    tracing::info!("worker/{} start", registration.name);
    let report = supervise(server, registration, index, token);
    tracing::debug!(runs = report.runs, reason = ?report.reason, "Supervisor finished");
    tracing::info!("worker/{} stop", registration.name);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Registry, Worker};
    use crate::config::{ServerConfig, WorkerSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Countdown {
        left: usize,
        calls: Arc<AtomicUsize>,
    }

    impl Worker for Countdown {
        fn run(&mut self, _ctx: &WorkerContext<'_>) -> Result<bool, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.left -= 1;
            Ok(self.left == 0)
        }
    }

    struct Failing;

    impl Worker for Failing {
        fn run(&mut self, _ctx: &WorkerContext<'_>) -> Result<bool, HandlerError> {
            Err(HandlerError::msg("broken"))
        }
    }

    struct BadInit;

    impl Worker for BadInit {
        fn init(&mut self, _ctx: &WorkerContext<'_>) -> Result<(), HandlerError> {
            panic!("no config")
        }

        fn run(&mut self, _ctx: &WorkerContext<'_>) -> Result<bool, HandlerError> {
            unreachable!()
        }
    }

    fn setup(calls: Arc<AtomicUsize>) -> (Arc<Server>, Registry) {
        let mut registry = Registry::with_builtins();
        registry
            .register_worker("Countdown", move |options| {
                let left = options.get("runs").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
                Box::new(Countdown {
                    left,
                    calls: calls.clone(),
                })
            })
            .register_worker("Failing", |_| Box::new(Failing))
            .register_worker("BadInit", |_| Box::new(BadInit));
        let server = Server::with_registry(ServerConfig::default(), registry.clone()).unwrap();
        (server, registry)
    }

    fn registration(registry: &Registry, class: &str, options: serde_json::Value) -> WorkerRegistration {
        let mut spec = WorkerSpec::class(class);
        spec.options = options.as_object().cloned().unwrap();
        registry.build_worker(&spec).unwrap()
    }

    #[test]
    fn process_exits_when_terminated_before_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (server, registry) = setup(calls.clone());
        let reg = registration(&registry, "Countdown", json!({"runs": 3}));

        let token = CancelToken::new();
        token.cancel();
        assert_eq!(run_process(&server, &reg, 0, &token), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stops_when_run_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (server, registry) = setup(calls.clone());
        let reg = registration(&registry, "Countdown", json!({"runs": 3, "sleep_time": 0}));

        let report = supervise(&server, &reg, 0, &CancelToken::new());
        assert!(matches!(report.reason, StopReason::Completed));
        assert_eq!(report.phase, WorkerPhase::Stopped);
        assert_eq!(report.runs, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stops_on_run_error() {
        let (server, registry) = setup(Arc::new(AtomicUsize::new(0)));
        let reg = registration(&registry, "Failing", json!({}));

        let report = supervise(&server, &reg, 0, &CancelToken::new());
        assert!(matches!(report.reason, StopReason::Failed(ProcessError::Run(_))));
        assert_eq!(report.runs, 1);
    }

    #[test]
    fn panicking_init_is_contained() {
        let (server, registry) = setup(Arc::new(AtomicUsize::new(0)));
        let reg = registration(&registry, "BadInit", json!({}));

        let report = supervise(&server, &reg, 0, &CancelToken::new());
        assert!(matches!(
            report.reason,
            StopReason::Failed(ProcessError::Init(HandlerError::Panic(_)))
        ));
        assert_eq!(report.runs, 0);
    }

    #[test]
    fn cancelled_token_skips_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (server, registry) = setup(calls.clone());
        let reg = registration(&registry, "Countdown", json!({"runs": 5}));
        let token = CancelToken::new();
        token.cancel();

        let report = supervise(&server, &reg, 0, &token);
        assert!(matches!(report.reason, StopReason::Cancelled));
        assert_eq!(report.runs, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

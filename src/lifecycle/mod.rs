//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! start (in the server process):
//!     startup.rs (daemonize, process titles)
//!     → engine runs; master writes pidfile.rs
//!     → signals.rs flags polled by master/manager loops
//!
//! stop / reload (from the CLI, another process):
//!     controller.rs → read pidfile.rs → SIGTERM / SIGUSR1 → poll for removal
//!
//! event worker shutdown:
//!     SIGTERM → shutdown.rs broadcast → HTTP server and WebSocket sessions drain
//! ```
//!
//! # Design Decisions
//! - The PID file is the only state shared with the controlling CLI
//! - Stop waits at most five seconds and never escalates to SIGKILL
//! - The PID file is removed before shutdown hooks run

pub mod controller;
pub mod pidfile;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use controller::{Controller, LifecycleError, StopOutcome, STOP_POLL_INTERVAL, STOP_TIMEOUT};
pub use pidfile::PidFile;
pub use shutdown::Shutdown;
pub use signals::{CancelToken, SignalFlags};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every process (master, manager, workers) emits:
//!     → tracing macros with structured fields
//!     → logging.rs (process-tagged line format)
//!     → stdout, or the log file when daemonized
//! ```
//!
//! # Design Decisions
//! - One subscriber, installed before the first fork and inherited
//! - Each line says which process wrote it
//! - No metrics endpoint

pub mod logging;

pub use logging::{
    format_prefix, init_logging, process_role, process_worker_id, set_process_identity,
    ProcessFormat, ProcessRole,
};

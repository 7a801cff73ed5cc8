//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per program
//! - Prefix every line with the emitting process: role flag, pid, worker id
//! - Configure the level from `RUST_LOG`, falling back to the config value
//!
//! # Design Decisions
//! - Line format: `[YYYY-mm-dd HH:MM:SS <flag><pid>.<worker_id>] LEVEL message`
//! - Role and worker id live in process globals, updated after every fork
//! - Plain text, no ANSI, so daemon log files stay greppable

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, Local};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Kind of process in the server tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessRole {
    Master = 0,
    Manager = 1,
    EventWorker = 2,
    TaskWorker = 3,
    Custom = 4,
}

impl ProcessRole {
    /// One-character marker used in log lines.
    pub fn flag(self) -> char {
        match self {
            Self::Master => '#',
            Self::Manager => '$',
            Self::EventWorker => '*',
            Self::TaskWorker => '^',
            Self::Custom => '~',
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Manager,
            2 => Self::EventWorker,
            3 => Self::TaskWorker,
            4 => Self::Custom,
            _ => Self::Master,
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Master => "master",
            Self::Manager => "manager",
            Self::EventWorker => "event worker",
            Self::TaskWorker => "task worker",
            Self::Custom => "custom worker",
        };
        f.write_str(name)
    }
}

static ROLE: AtomicU8 = AtomicU8::new(ProcessRole::Master as u8);
static WORKER_ID: AtomicU32 = AtomicU32::new(0);

/// Record who this process is. Called right after each fork.
pub fn set_process_identity(role: ProcessRole, worker_id: u32) {
    ROLE.store(role as u8, Ordering::Relaxed);
    WORKER_ID.store(worker_id, Ordering::Relaxed);
}

pub fn process_role() -> ProcessRole {
    ProcessRole::from_u8(ROLE.load(Ordering::Relaxed))
}

pub fn process_worker_id() -> u32 {
    WORKER_ID.load(Ordering::Relaxed)
}

/// `[<timestamp> <flag><pid>.<worker_id>]`
pub fn format_prefix(time: &DateTime<Local>, role: ProcessRole, pid: u32, worker_id: u32) -> String {
    format!(
        "[{} {}{}.{}]",
        time.format("%Y-%m-%d %H:%M:%S"),
        role.flag(),
        pid,
        worker_id
    )
}

/// Event formatter producing the process-tagged line format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessFormat;

impl<S, N> FormatEvent<S, N> for ProcessFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let prefix = format_prefix(
            &Local::now(),
            process_role(),
            std::process::id(),
            process_worker_id(),
        );
        write!(writer, "{} {} ", prefix, event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `default_level` applies when `RUST_LOG`
/// is unset or invalid.
pub fn init_logging(default_level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(ProcessFormat),
        )
        .try_init()
}

//! Cross-process connection bookkeeping.
//!
//! # Data Flow
//! ```text
//! Event worker accepts a WebSocket
//!     → connection.rs (claim an id from the shared pool)
//!     → table.rs (record id → worker id)
//!     → ... connection lives ...
//!     → table.rs (delete on close, or crash cleanup from the manager)
//!     → connection.rs (release the id)
//! ```
//!
//! # Design Decisions
//! - Shared state lives in anonymous MAP_SHARED memory created before fork
//! - Only atomics are shared; no cross-process locks
//! - Everything else stays per-process

pub mod connection;
pub mod shm;
pub mod table;

pub use connection::{ConnectionId, IdAllocator, WorkerId};
pub use table::{ConnectionTable, TableError, DEFAULT_CAPACITY};

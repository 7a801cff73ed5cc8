//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request or WebSocket open (path)
//!     → router.rs (ordered scan of registrations)
//!     → matcher.rs (exact or prefix test)
//!     → Return: (index, Registration) or no match
//! ```
//!
//! # Design Decisions
//! - Registrations built at boot, immutable afterwards
//! - First match wins; order comes from configuration
//! - No match is explicit: 404 for HTTP, forced close for WebSocket

pub mod matcher;
pub mod router;

pub use matcher::PathMatcher;
pub use router::{Registration, Router};

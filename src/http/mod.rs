//! HTTP and WebSocket surface seen by handlers.
//!
//! # Data Flow
//! ```text
//! Engine (axum) receives a request
//!     → request.rs (buffered, read-only view with a unique id)
//!     → handler.on_request(request, response)
//!     → response.rs (buffered builder, converted back to axum)
//!
//! Engine upgrades a WebSocket
//!     → handler.on_open(request)
//!     → websocket.rs (each message becomes a Frame for on_message)
//! ```

pub mod request;
pub mod response;
pub mod websocket;

pub use request::{Request, X_REQUEST_ID};
pub use response::{Cookie, Response};
pub use websocket::{Frame, Opcode};

//! The `Handler` trait.

use axum::http::StatusCode;

use crate::app::HandlerError;
use crate::http::{Frame, Request, Response};
use crate::net::ConnectionId;
use crate::server::Server;

/// Serves HTTP requests and WebSocket connections under one path.
///
/// Instances are built once at boot and shared read-only by every process,
/// so callbacks take `&self`; per-connection state belongs in a map keyed by
/// [`ConnectionId`].
pub trait Handler: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Path used when the configuration does not give one. Empty means `/`.
    fn default_path(&self) -> &str {
        ""
    }

    /// Master, before the engine starts.
    fn on_init(&self, _server: &Server) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Master, once the PID file is written.
    fn on_start(&self, _server: &Server) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Master, after the PID file is removed.
    fn on_shutdown(&self, _server: &Server) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Every event and task worker, after it starts.
    fn on_worker_start(&self, _server: &Server) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Every event and task worker, before it exits.
    fn on_worker_stop(&self, _server: &Server) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A WebSocket connection was accepted. Closes it unless overridden.
    fn on_open(&self, server: &Server, request: &Request) -> Result<(), HandlerError> {
        server.close(request.conn_id(), false)?;
        Ok(())
    }

    fn on_close(&self, _server: &Server, _conn_id: ConnectionId) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_message(&self, _server: &Server, _frame: &Frame) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Plain HTTP request. Answers 404 unless overridden.
    fn on_request(
        &self,
        _server: &Server,
        _request: &Request,
        response: &mut Response,
    ) -> Result<(), HandlerError> {
        response.error(StatusCode::NOT_FOUND);
        Ok(())
    }
}

fn short_type_name(full: &str) -> &str {
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Handler for Plain {}

    #[test]
    fn name_defaults_to_type_name() {
        assert_eq!(Plain.name(), "Plain");
        assert_eq!(Plain.default_path(), "");
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("a::b::C"), "C");
        assert_eq!(short_type_name("C"), "C");
    }
}

//! Handlers and tasks available without any user code.

use serde_json::Value;

use crate::app::{Handler, HandlerError};
use crate::config::Options;
use crate::http::{Frame, Opcode, Request, Response};
use crate::server::Server;
use crate::task::{Task, TaskError};

/// Answers every request with the request's server info as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl Handler for DefaultHandler {
    fn name(&self) -> &str {
        "DefaultHandler"
    }

    fn on_request(
        &self,
        _server: &Server,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), HandlerError> {
        response.header("content-type", "application/json; charset=utf-8");
        response.send_json(&request.server_info())?;

        tracing::debug!(
            status = response.status_code().as_u16(),
            elapsed = format!("{:.6}", request.execute_time().as_secs_f64()),
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request.unique_id(),
            "Served request"
        );
        Ok(())
    }
}

/// Accepts WebSocket connections at `/echo` and sends every data frame back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn name(&self) -> &str {
        "EchoHandler"
    }

    fn default_path(&self) -> &str {
        "/echo"
    }

    fn on_open(&self, _server: &Server, request: &Request) -> Result<(), HandlerError> {
        tracing::debug!(conn_id = %request.conn_id(), path = request.path(), "Echo connection opened");
        Ok(())
    }

    fn on_message(&self, server: &Server, frame: &Frame) -> Result<(), HandlerError> {
        if matches!(frame.opcode, Opcode::Text | Opcode::Binary) {
            server.push(frame.conn_id, frame.opcode, frame.data.clone())?;
        }
        Ok(())
    }
}

/// Returns its `msg` option, or every option when `msg` is absent.
#[derive(Debug, Clone)]
pub struct EchoTask {
    options: Options,
}

impl EchoTask {
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

impl Task for EchoTask {
    fn run(&mut self, _server: &Server) -> Result<Value, TaskError> {
        Ok(self
            .options
            .get("msg")
            .cloned()
            .unwrap_or_else(|| Value::Object(self.options.clone())))
    }
}

//! Response builder handed to handlers.
//!
//! # Responsibilities
//! - Buffer status, headers, cookies and body written by a handler
//! - Render the standard HTML error page
//! - Convert into an axum response once the handler returns
//!
//! # Design Decisions
//! - Nothing reaches the socket until the handler returns, so a failing
//!   handler can still be turned into a clean 500
//! - Writes after `send`/`error` are ignored and logged

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

/// A `Set-Cookie` entry.
#[derive(Debug, Clone, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: Some("/".to_string()),
            ..Default::default()
        }
    }

    fn render(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Vec<u8>,
    output: bool,
    finished: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: axum::http::HeaderMap::new(),
            body: Vec::new(),
            output: false,
            finished: false,
        }
    }

    /// Set a header, replacing earlier values. Invalid names or values are
    /// dropped with a warning.
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(name, "Dropping invalid response header"),
        }
        self
    }

    pub fn cookie(&mut self, cookie: &Cookie) -> &mut Self {
        match HeaderValue::try_from(cookie.render()) {
            Ok(value) => {
                self.headers.append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(name = %cookie.name, "Dropping invalid cookie"),
        }
        self
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Append a chunk to the body.
    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        if self.finished {
            tracing::warn!("Write after response was finished");
            return;
        }
        self.output = true;
        self.body.extend_from_slice(data.as_ref());
    }

    /// Append the final chunk and finish the response.
    pub fn send(&mut self, data: impl AsRef<[u8]>) {
        self.write(data);
        self.output = true;
        self.finished = true;
    }

    /// Serialize `value` as the final body with a JSON content type.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.header("content-type", "application/json; charset=utf-8");
        }
        self.send(body);
        Ok(())
    }

    /// Replace whatever was written with the standard error page.
    pub fn error(&mut self, status: StatusCode) {
        self.status = status;
        self.headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        self.body = format!(
            "<html><body><h2>HTTP ERROR {}</h2><hr><i>Powered by vicuna-server ({})</i></body></html>",
            status.as_u16(),
            env!("CARGO_PKG_VERSION")
        )
        .into_bytes();
        self.output = true;
        self.finished = true;
    }

    pub fn has_output(&self) -> bool {
        self.output
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_http(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

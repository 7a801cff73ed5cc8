//! Request view handed to handlers.
//!
//! # Responsibilities
//! - Expose method, path, headers, query, cookies and body read-only
//! - Tag every request with a unique id (UUID v4) for log correlation
//! - Build the CGI-style server info map used by the default handler
//!
//! # Design Decisions
//! - The body is fully buffered before the handler runs
//! - Header lookups are case-insensitive (HeaderMap semantics)
//! - `X-Real-IP` is trusted only when the peer is a configured proxy

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::net::ConnectionId;

/// Header carrying the per-request id.
pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct Request {
    conn_id: ConnectionId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    started: Instant,
    unique_id: Uuid,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            conn_id: ConnectionId::new(0),
            method,
            uri,
            headers,
            body,
            remote_addr: None,
            started: Instant::now(),
            unique_id: Uuid::new_v4(),
        }
    }

    /// Bodiless GET for `uri`.
    pub fn get(uri: &str) -> Result<Self, axum::http::uri::InvalidUri> {
        Ok(Self::new(Method::GET, uri.parse()?, HeaderMap::new(), Bytes::new()))
    }

    pub fn with_conn_id(mut self, conn_id: ConnectionId) -> Self {
        self.conn_id = conn_id;
        self
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Connection this request arrived on.
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string, if any.
    pub fn uri(&self) -> String {
        match self.uri.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.uri.path(), q),
            _ => self.uri.path().to_string(),
        }
    }

    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First query parameter named `key`, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// All query parameters; later duplicates win.
    pub fn queries(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .into_owned()
            .collect()
    }

    /// Cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Peer address, or `X-Real-IP` when the peer is one of `trusted_proxies`.
    pub fn client_ip(&self, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
        let peer = self.remote_addr.map(|a| a.ip());
        match (peer, self.header("x-real-ip").and_then(|v| v.trim().parse().ok())) {
            (Some(peer), Some(real)) if trusted_proxies.contains(&peer) => Some(real),
            (peer, _) => peer,
        }
    }

    pub fn is_websocket(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    /// Time since the request reached the handler layer.
    pub fn execute_time(&self) -> Duration {
        self.started.elapsed()
    }

    /// CGI-style view of the request: `HTTP_*` headers plus request metadata.
    pub fn server_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                let key = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
                info.insert(key, Value::String(value.to_string()));
            }
        }
        info.insert("REQUEST_METHOD".into(), self.method.as_str().into());
        info.insert("REQUEST_URI".into(), self.path().into());
        info.insert("PATH_INFO".into(), self.path().into());
        info.insert("QUERY_STRING".into(), self.query_string().into());
        info.insert("REQUEST_ID".into(), self.unique_id.to_string().into());
        if let Some(addr) = self.remote_addr {
            info.insert("REMOTE_ADDR".into(), addr.ip().to_string().into());
            info.insert("REMOTE_PORT".into(), addr.port().into());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        Request::get(uri).unwrap()
    }

    #[test]
    fn path_uri_and_query() {
        let req = request("/search?q=rust%20lang&page=2&q=second");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.uri(), "/search?q=rust%20lang&page=2&q=second");
        assert_eq!(req.query("q").as_deref(), Some("rust lang"));
        assert_eq!(req.query("missing"), None);
        assert_eq!(req.queries()["q"], "second");
        assert_eq!(req.queries()["page"], "2");
    }

    #[test]
    fn headers_and_cookies() {
        let req = request("/")
            .with_header("content-type", "application/json")
            .with_header("cookie", "session=abc; theme=dark");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
        assert_eq!(req.cookie("nope"), None);
    }

    #[test]
    fn websocket_detection() {
        assert!(request("/ws").with_header("upgrade", "WebSocket").is_websocket());
        assert!(!request("/ws").is_websocket());
    }

    #[test]
    fn client_ip_trusts_only_configured_proxies() {
        let proxy: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let req = request("/")
            .with_remote_addr(Some(proxy))
            .with_header("x-real-ip", "203.0.113.9");

        assert_eq!(req.client_ip(&[]), Some(proxy.ip()));
        assert_eq!(
            req.client_ip(&[proxy.ip()]),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn json_body() {
        let req = Request::new(
            Method::POST,
            "/items".parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(br#"{"name":"widget"}"#),
        );
        let value: Value = req.json().unwrap();
        assert_eq!(value["name"], "widget");
    }

    #[test]
    fn server_info_uses_cgi_names() {
        let req = request("/a?x=1")
            .with_header("user-agent", "test")
            .with_remote_addr(Some("127.0.0.1:5555".parse().unwrap()));
        let info = req.server_info();
        assert_eq!(info["HTTP_USER_AGENT"], "test");
        assert_eq!(info["REQUEST_METHOD"], "GET");
        assert_eq!(info["REQUEST_URI"], "/a");
        assert_eq!(info["QUERY_STRING"], "x=1");
        assert_eq!(info["REMOTE_ADDR"], "127.0.0.1");
        assert_eq!(info["REMOTE_PORT"], 5555);
    }
}

//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use vicuna::config::{HandlerSpec, ServerConfig};
use vicuna::engine::{build_app, EventRuntime, ServerEvents};
use vicuna::lifecycle::Shutdown;
use vicuna::net::IdAllocator;
use vicuna::{Registry, Server};

/// Config with a small connection table and the given handlers.
pub fn config_with(handlers: Vec<HandlerSpec>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        max_connections: 128,
        handlers,
        ..ServerConfig::default()
    }
}

/// An event worker's runtime attached to `server`, as `on_worker_start` would.
pub fn attach_event_runtime(server: &Arc<Server>, worker_id: u32) -> Arc<EventRuntime> {
    let ids = Arc::new(IdAllocator::new(server.config().max_connections).unwrap());
    let runtime = Arc::new(EventRuntime::new(worker_id, std::process::id(), ids, None));
    server.on_worker_start(runtime.clone());
    runtime
}

/// Build a server from `registry` and `handlers`, with an attached runtime.
pub fn server_with(registry: Registry, handlers: Vec<HandlerSpec>) -> (Arc<Server>, Arc<EventRuntime>) {
    let server = Server::with_registry(config_with(handlers), registry).unwrap();
    let runtime = attach_event_runtime(&server, 0);
    (server, runtime)
}

/// The event worker app for `server`.
pub fn app(server: &Arc<Server>, runtime: &Arc<EventRuntime>, shutdown: &Shutdown) -> axum::Router {
    let events: Arc<dyn ServerEvents> = server.clone();
    build_app(events, runtime.clone(), shutdown.clone())
}

/// Serve the event worker app on an ephemeral port.
pub async fn serve(server: &Arc<Server>, runtime: &Arc<EventRuntime>, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(server, runtime, shutdown);
    let drained = shutdown.clone();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { drained.wait().await })
            .await
            .unwrap();
    });
    addr
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `check` every 20 ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

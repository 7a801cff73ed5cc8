//! Event worker process: HTTP and WebSocket serving.
//!
//! # Responsibilities
//! - Serve the inherited listener with axum on a current-thread runtime
//! - Turn WebSocket upgrades into sessions with ids from the shared pool
//! - Buffer plain HTTP requests and hand them to `on_request`, tagging each
//!   response with the request's `x-request-id`
//! - Deliver task replies to `on_finish`
//! - Drain gracefully on SIGTERM, closing every session
//!
//! # Design Decisions
//! - Handler callbacks are synchronous; outbound frames go through a
//!   per-session channel so `push` never awaits
//! - Request bodies are capped at 2 MiB

use std::net::SocketAddr;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::engine::ipc::{self, TaskReply, MAX_DATAGRAM};
use crate::engine::{ProcessRole, Runtime, RuntimeError, ServerEvents};
use crate::http::{Frame, Opcode, Request, Response, X_REQUEST_ID};
use crate::lifecycle::{CancelToken, Shutdown};
use crate::net::{ConnectionId, IdAllocator, WorkerId};
use crate::task::TaskDescriptor;

/// Largest request body passed to handlers.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// How long a stopping worker waits for its sessions to finish.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

enum Outbound {
    Message(Message),
    Close { reset: bool },
}

/// Runtime of an event worker.
pub struct EventRuntime {
    worker_id: WorkerId,
    master_pid: u32,
    ids: Arc<IdAllocator>,
    sessions: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    queue: Option<StdUnixDatagram>,
}

impl EventRuntime {
    pub fn new(
        worker_id: WorkerId,
        master_pid: u32,
        ids: Arc<IdAllocator>,
        queue: Option<StdUnixDatagram>,
    ) -> Self {
        Self {
            worker_id,
            master_pid,
            ids,
            sessions: DashMap::new(),
            queue,
        }
    }

    /// Open WebSocket sessions in this worker.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn send(&self, conn: ConnectionId, outbound: Outbound) -> Result<(), RuntimeError> {
        let tx = self
            .sessions
            .get(&conn)
            .ok_or(RuntimeError::UnknownConnection(conn))?;
        tx.send(outbound)
            .map_err(|_| RuntimeError::UnknownConnection(conn))
    }
}

impl Runtime for EventRuntime {
    fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    fn role(&self) -> ProcessRole {
        ProcessRole::EventWorker
    }

    fn master_pid(&self) -> u32 {
        self.master_pid
    }

    fn close(&self, conn: ConnectionId, reset: bool) -> Result<(), RuntimeError> {
        self.send(conn, Outbound::Close { reset })
    }

    fn push(&self, conn: ConnectionId, opcode: Opcode, data: Bytes, finish: bool) -> Result<(), RuntimeError> {
        if !finish {
            return Err(RuntimeError::Fragmented);
        }
        let message = Frame::new(conn, opcode, data)
            .into_message()
            .ok_or(RuntimeError::InvalidText)?;
        self.send(conn, Outbound::Message(message))
    }

    fn dispatch_task(&self, descriptor: TaskDescriptor) -> Result<(), RuntimeError> {
        let queue = self.queue.as_ref().ok_or(RuntimeError::NoTaskWorkers)?;
        ipc::send_descriptor(queue, &descriptor)
    }
}

#[derive(Clone)]
struct WorkerState {
    events: Arc<dyn ServerEvents>,
    runtime: Arc<EventRuntime>,
    shutdown: Shutdown,
}

/// The axum application served by every event worker.
pub fn build_app(
    events: Arc<dyn ServerEvents>,
    runtime: Arc<EventRuntime>,
    shutdown: Shutdown,
) -> axum::Router {
    axum::Router::new()
        .fallback(dispatch)
        .with_state(WorkerState {
            events,
            runtime,
            shutdown,
        })
        .layer(TraceLayer::new_for_http())
}

fn is_websocket_upgrade(request: &axum::extract::Request) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn status_response(status: StatusCode) -> axum::response::Response {
    let mut response = Response::new();
    response.error(status);
    response.into_http()
}

async fn dispatch(State(state): State<WorkerState>, request: axum::extract::Request) -> axum::response::Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    if is_websocket_upgrade(&request) {
        return upgrade(state, request, remote).await;
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting request body");
            return status_response(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let Some(conn) = state.runtime.ids.allocate() else {
        tracing::error!("Connection id pool exhausted");
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    };
    let request = Request::new(parts.method, parts.uri, parts.headers, body)
        .with_conn_id(conn)
        .with_remote_addr(remote);
    let mut response = Response::new();
    state.events.on_request(&request, &mut response);
    state.runtime.ids.release(conn);

    let mut http = response.into_http();
    if let Ok(id) = HeaderValue::from_str(&request.unique_id().to_string()) {
        http.headers_mut().insert(X_REQUEST_ID, id);
    }
    http
}

async fn upgrade(
    state: WorkerState,
    request: axum::extract::Request,
    remote: Option<SocketAddr>,
) -> axum::response::Response {
    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    if state.shutdown.is_triggered() {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }
    let Some(conn) = state.runtime.ids.allocate() else {
        tracing::error!("Connection id pool exhausted");
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    };

    let request = Request::new(parts.method, parts.uri, parts.headers, Bytes::new())
        .with_conn_id(conn)
        .with_remote_addr(remote);
    ws.on_upgrade(move |socket| session(state, request, socket))
}

fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: Utf8Bytes::from_static("server shutting down"),
    }))
}

async fn session(state: WorkerState, request: Request, socket: WebSocket) {
    let conn = request.conn_id();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.runtime.sessions.insert(conn, tx);

    state.events.on_open(&request);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Message(message)) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { reset }) => {
                    if !reset {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                    }
                    break;
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(message)) => {
                    let frame = Frame::from_message(conn, message);
                    state.events.on_message(&frame);
                }
            },
            // `wait` also resolves for a trigger that preceded this session.
            _ = state.shutdown.wait() => {
                let _ = sink.send(going_away()).await;
                break;
            }
        }
    }

    state.runtime.sessions.remove(&conn);
    state.events.on_close(conn);
    state.runtime.ids.release(conn);
}

pub(crate) async fn read_replies(events: Arc<dyn ServerEvents>, socket: tokio::net::UnixDatagram) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                tracing::error!(error = %e, "Task reply channel failed");
                return;
            }
        };
        match ipc::decode::<TaskReply>(&buf[..len]) {
            Ok(reply) => events.on_finish(reply.id, reply.outcome),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed task reply"),
        }
    }
}

/// Everything an event worker inherits from the manager.
pub(crate) struct EventWorkerContext {
    pub worker_id: WorkerId,
    pub master_pid: u32,
    pub events: Arc<dyn ServerEvents>,
    pub listener: std::net::TcpListener,
    pub ids: Arc<IdAllocator>,
    pub queue: Option<StdUnixDatagram>,
    pub replies: Option<StdUnixDatagram>,
    pub terminate: CancelToken,
}

/// Process entry. Returns the exit status.
pub(crate) fn run(ctx: EventWorkerContext) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build event loop");
            return 1;
        }
    };
    match runtime.block_on(serve(ctx)) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Event worker failed");
            1
        }
    }
}

async fn serve(ctx: EventWorkerContext) -> std::io::Result<()> {
    ctx.listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(ctx.listener)?;
    let shutdown = Shutdown::new();
    let runtime = Arc::new(EventRuntime::new(ctx.worker_id, ctx.master_pid, ctx.ids, ctx.queue));

    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        terminate.recv().await;
        tracing::info!("Received SIGTERM, draining");
        trigger.trigger();
    });
    // A SIGTERM before the listener above only reached the inherited flag.
    if ctx.terminate.is_cancelled() {
        tracing::info!("SIGTERM arrived during startup, draining");
        shutdown.trigger();
    }

    ctx.events.on_worker_start(runtime.clone());

    if let Some(replies) = ctx.replies {
        replies.set_nonblocking(true)?;
        let replies = tokio::net::UnixDatagram::from_std(replies)?;
        tokio::spawn(read_replies(ctx.events.clone(), replies));
    }

    let app = build_app(ctx.events.clone(), runtime.clone(), shutdown.clone());
    let drained = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { drained.wait().await })
        .await?;

    let deadline = tokio::time::Instant::now() + SESSION_DRAIN_TIMEOUT;
    while runtime.session_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    ctx.events.on_worker_stop(ctx.worker_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Registry;
    use crate::server::tests::small_config;
    use crate::server::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn terminate_before_startup_still_drains() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut config = small_config();
        let seen = stops.clone();
        config.hooks.on_worker_stop = Some(Arc::new(move |_: &Server| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let server = Server::with_registry(config, Registry::with_builtins()).unwrap();

        let terminate = CancelToken::new();
        terminate.cancel();
        let status = run(EventWorkerContext {
            worker_id: 0,
            master_pid: 1,
            events: server,
            listener: std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
            ids: Arc::new(IdAllocator::new(8).unwrap()),
            queue: None,
            replies: None,
            terminate,
        });

        assert_eq!(status, 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}

//! WebSocket sessions through a served event worker app.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use vicuna::config::HandlerSpec;
use vicuna::http::{Frame, Opcode, Request};
use vicuna::lifecycle::Shutdown;
use vicuna::net::ConnectionId;
use vicuna::{Handler, HandlerError, Registry, Server};

mod common;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Counts {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Greets on open, then upper-cases text frames.
struct Shouter(Arc<Counts>);

impl Handler for Shouter {
    fn on_open(&self, server: &Server, request: &Request) -> Result<(), HandlerError> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        server.push(request.conn_id(), Opcode::Text, "welcome")?;
        Ok(())
    }

    fn on_close(&self, _server: &Server, _conn: ConnectionId) -> Result<(), HandlerError> {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_message(&self, server: &Server, frame: &Frame) -> Result<(), HandlerError> {
        let text = frame.text().ok_or_else(|| HandlerError::msg("text only"))?;
        if text == "bye" {
            server.close(frame.conn_id, false)?;
            return Ok(());
        }
        server.push(frame.conn_id, Opcode::Text, text.to_uppercase())?;
        Ok(())
    }
}

fn setup() -> (Arc<Server>, Arc<vicuna::engine::EventRuntime>, Arc<Counts>) {
    let counts = Arc::new(Counts::default());
    let shared = counts.clone();
    let mut registry = Registry::with_builtins();
    registry.register_handler("Shouter", move |_| Box::new(Shouter(shared.clone())));
    let (server, runtime) = common::server_with(
        registry,
        vec![HandlerSpec::class("EchoHandler"), HandlerSpec::at("Shouter", "/shout/")],
    );
    (server, runtime, counts)
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (server, runtime, _) = setup();
    let addr = common::serve(&server, &runtime, &Shutdown::new()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/echo", addr)).await.unwrap();
    ws.send(Message::text("ping")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::text("ping"));

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::binary(vec![1u8, 2, 3]));

    assert_eq!(server.connections().len(), 1);
    ws.close(None).await.unwrap();
    assert!(common::eventually(WAIT, || server.connections().is_empty()).await);
}

#[tokio::test]
async fn test_handler_lifecycle_and_server_close() {
    let (server, runtime, counts) = setup();
    let addr = common::serve(&server, &runtime, &Shutdown::new()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/shout/room", addr)).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("welcome"));

    ws.send(Message::text("hey")).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("HEY"));

    ws.send(Message::text("bye")).await.unwrap();
    let closing = ws.next().await.unwrap().unwrap();
    assert!(closing.is_close());

    assert!(common::eventually(WAIT, || counts.closed.load(Ordering::SeqCst) == 1).await);
    assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
    assert!(server.connections().is_empty());
    assert_eq!(runtime.session_count(), 0);
}

#[tokio::test]
async fn test_unmatched_path_is_closed() {
    let (server, runtime, _) = setup();
    let addr = common::serve(&server, &runtime, &Shutdown::new()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/nowhere", addr)).await.unwrap();
    let first = ws.next().await;
    assert!(matches!(first, Some(Ok(Message::Close(_))) | Some(Err(_)) | None));
    assert!(common::eventually(WAIT, || server.connections().is_empty()).await);
}

#[tokio::test]
async fn test_failing_message_handler_closes_connection() {
    let (server, runtime, counts) = setup();
    let addr = common::serve(&server, &runtime, &Shutdown::new()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/shout/", addr)).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::text("welcome"));

    ws.send(Message::binary(vec![0xffu8])).await.unwrap();
    let closing = ws.next().await;
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | Some(Err(_)) | None));
    assert!(common::eventually(WAIT, || counts.closed.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let (server, runtime, _) = setup();
    let shutdown = Shutdown::new();
    let addr = common::serve(&server, &runtime, &shutdown).await;

    let (mut ws, _) = connect_async(format!("ws://{}/echo", addr)).await.unwrap();
    assert!(common::eventually(WAIT, || runtime.session_count() == 1).await);

    shutdown.trigger();
    let closing = ws.next().await.unwrap().unwrap();
    match closing {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(common::eventually(WAIT, || runtime.session_count() == 0).await);
}

#[tokio::test]
async fn test_tasks_need_task_workers() {
    let (server, _runtime, _) = setup();
    let err = server
        .task("EchoTask", Default::default(), |_, _| {})
        .unwrap_err();
    assert!(matches!(err, vicuna::engine::RuntimeError::NoTaskWorkers));
    assert_eq!(server.tasks_in_flight(), 0);
}

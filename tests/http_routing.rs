//! HTTP requests through the event worker app.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use vicuna::config::HandlerSpec;
use vicuna::http::Response;
use vicuna::lifecycle::Shutdown;
use vicuna::{Handler, HandlerError, Registry, Server};

mod common;

struct Greeter;

impl Handler for Greeter {
    fn on_request(
        &self,
        _server: &Server,
        request: &vicuna::http::Request,
        response: &mut Response,
    ) -> Result<(), HandlerError> {
        match request.query("name") {
            Some(name) => {
                response.header("x-greeter", "1");
                response.send(format!("hello {}", name));
                Ok(())
            }
            None => Err(HandlerError::msg("name missing")),
        }
    }
}

fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register_handler("Greeter", |_| Box::new(Greeter));
    registry
}

fn request(uri: &str) -> Request<Body> {
    let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let peer: SocketAddr = "10.0.0.7:4567".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

async fn body_of(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_default_handler_dumps_server_info() {
    let (server, runtime) = common::server_with(registry(), vec![HandlerSpec::class("DefaultHandler")]);
    let app = common::app(&server, &runtime, &Shutdown::new());

    let response = app.oneshot(request("/any/path?x=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));

    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let info: Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(info["REQUEST_ID"], request_id.as_str());
    assert!(uuid::Uuid::parse_str(&request_id).is_ok());
    assert_eq!(info["REQUEST_METHOD"], "GET");
    assert_eq!(info["QUERY_STRING"], "x=1");
    assert_eq!(info["REMOTE_ADDR"], "10.0.0.7");
}

#[tokio::test]
async fn test_routing_and_error_mapping() {
    let (server, runtime) = common::server_with(registry(), vec![HandlerSpec::at("Greeter", "/greet")]);
    let shutdown = Shutdown::new();

    let response = common::app(&server, &runtime, &shutdown)
        .oneshot(request("/greet?name=ada"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-greeter"], "1");
    assert_eq!(body_of(response).await, b"hello ada");

    let response = common::app(&server, &runtime, &shutdown)
        .oneshot(request("/greet"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["connection"], "close");

    let response = common::app(&server, &runtime, &shutdown)
        .oneshot(request("/greet/more"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connection_ids_are_returned_after_requests() {
    let (server, runtime) = common::server_with(registry(), vec![HandlerSpec::class("DefaultHandler")]);
    let shutdown = Shutdown::new();

    for _ in 0..3 {
        let response = common::app(&server, &runtime, &shutdown)
            .oneshot(request("/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(runtime.session_count(), 0);
    assert!(server.connections().is_empty());
}

#[tokio::test]
async fn test_handler_without_on_request_answers_404() {
    struct Silent;
    impl Handler for Silent {}

    let mut registry = registry();
    registry.register_handler("Silent", |_| Box::new(Silent));
    let (server, runtime) = common::server_with(registry, vec![HandlerSpec::class("Silent")]);

    let response = common::app(&server, &runtime, &Shutdown::new())
        .oneshot(request("/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let page = String::from_utf8(body_of(response).await).unwrap();
    assert!(page.contains("HTTP ERROR 404"));
}

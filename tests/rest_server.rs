//! REST control server over real HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use reqwest::{Method, StatusCode};
use serde_json::json;
use tcp_platform::apps::{EchoClient, EchoCodec, EchoServer, EchoUtf8StringHandler, ShutdownHandler};
use tcp_platform::config::{ClientConfig, EchoConfig, InitiatorConfig, RestServerConfig};
use tcp_platform::lifecycle::Shutdownable;
use tcp_platform::rest::{
    Handler, HandlerContext, JsonHandlerResult, RestError, RestRequest, RestRequestHandler, RestServer,
};

mod common;

const TERMINATION: Duration = Duration::from_secs(1);

/// Reports its name and the arguments it received.
struct Reporter(&'static str);

impl RestRequestHandler<JsonHandlerResult> for Reporter {
    fn handle_request(
        &self,
        _request: RestRequest,
        context: HandlerContext,
    ) -> BoxFuture<'static, Result<JsonHandlerResult, RestError>> {
        let result = JsonHandlerResult::with_reason(hyper::StatusCode::OK, self.0)
            .field("arguments", context.arguments().to_vec());
        future::ready(Ok(result)).boxed()
    }
}

struct Exploding;

impl RestRequestHandler<JsonHandlerResult> for Exploding {
    fn handle_request(
        &self,
        _request: RestRequest,
        _context: HandlerContext,
    ) -> BoxFuture<'static, Result<JsonHandlerResult, RestError>> {
        panic!("handler bug")
    }
}

fn control_config() -> RestServerConfig {
    RestServerConfig {
        listener: common::any_port(),
        ..RestServerConfig::default()
    }
}

fn bound(binding: &str, logic: impl RestRequestHandler<JsonHandlerResult>) -> Handler<JsonHandlerResult> {
    Handler::new(binding.parse().unwrap(), logic)
}

async fn start(handlers: Vec<Handler<JsonHandlerResult>>) -> (RestServer, SocketAddr) {
    let server = RestServer::new(&control_config(), TERMINATION, handlers).unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

#[tokio::test]
async fn routes_by_longest_binding_prefix() {
    let (server, addr) = start(vec![
        bound("GET /a/", Reporter("a")),
        bound("GET /a/b/", Reporter("a/b")),
    ])
    .await;

    let (status, body) = common::call(Method::GET, format!("http://{addr}/a/b/c/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"httpReasonPhrase": "a/b", "arguments": ["c"]}));

    let (_, body) = common::call(Method::GET, format!("http://{addr}/a/x%20y/")).await;
    assert_eq!(body, json!({"httpReasonPhrase": "a", "arguments": ["x y"]}));

    server.shutdown().await;
}

#[tokio::test]
async fn client_errors_are_400_with_reason() {
    let (server, addr) = start(vec![bound("GET /known/", Reporter("known"))]).await;

    let (status, body) = common::call(Method::GET, format!("http://{addr}/unknown/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"httpReasonPhrase": "Unknown REST request"}));

    let (status, body) = common::call(Method::PATCH, format!("http://{addr}/known/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"httpReasonPhrase": "Incorrect REST request syntax"}));

    server.shutdown().await;
}

#[tokio::test]
async fn handler_panic_is_500_without_detail() {
    let (server, addr) = start(vec![bound("GET /boom/", Exploding)]).await;

    let (status, body) = common::call(Method::GET, format!("http://{addr}/boom/")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"httpReasonPhrase": "Internal server error"}));

    // the connection and server stay usable
    let (status, _) = common::call(Method::GET, format!("http://{addr}/boom/")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_request_stops_targets_then_control_server() {
    let echo = Arc::new(EchoServer::echo(
        &EchoConfig {
            listener: common::any_port(),
            ..EchoConfig::default()
        },
        TERMINATION,
    ));
    echo.start().await.unwrap();
    let shutdown = ShutdownHandler::new("Stopping", vec![Arc::clone(&echo) as Arc<dyn Shutdownable>])
        .bound()
        .unwrap();
    let (control, addr) = start(vec![shutdown]).await;

    let (status, _) = common::call(Method::PUT, format!("http://{addr}/shutdown/extra/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(echo.is_active());

    let (status, body) = common::call(Method::PUT, format!("http://{addr}/shutdown/")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["httpReasonPhrase"], "Stopping");
    assert!(!echo.is_active());

    tokio::time::timeout(Duration::from_secs(5), control.closed())
        .await
        .expect("control server was not stopped after the reply");
    control.shutdown().await;
    control.shutdown().await;
    assert!(!control.dispatcher().is_active());
}

#[tokio::test]
async fn initiator_echoes_utf8_strings() {
    let echo = EchoServer::echo(
        &EchoConfig {
            listener: common::any_port(),
            ..EchoConfig::default()
        },
        TERMINATION,
    );
    let backend = echo.start().await.unwrap();
    let client = Arc::new(EchoClient::new(
        &ClientConfig {
            address: backend.to_string(),
            ..ClientConfig::default()
        },
        TERMINATION,
        EchoCodec::new,
    ));
    let handler = EchoUtf8StringHandler::new(Arc::clone(&client), &InitiatorConfig::default())
        .bound()
        .unwrap();
    let (control, addr) = start(vec![handler]).await;

    let (status, body) = common::call(Method::POST, format!("http://{addr}/utf8string/hello%20w%C3%B6rld/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"httpReasonPhrase": "Echo completed", "response": "hello wörld"}));

    let (status, _) = common::call(Method::POST, format!("http://{addr}/utf8string/a/b/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = common::call(Method::POST, format!("http://{addr}/utf8string/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    control.shutdown().await;
    client.shutdown().await;
    echo.shutdown().await;
}

#[tokio::test]
async fn initiator_reports_echo_timeout_as_408() {
    let (silent, _) = common::start_silent_peer().await;
    let client = Arc::new(EchoClient::new(
        &ClientConfig {
            address: silent.to_string(),
            ..ClientConfig::default()
        },
        TERMINATION,
        EchoCodec::new,
    ));
    let handler = EchoUtf8StringHandler::new(
        Arc::clone(&client),
        &InitiatorConfig {
            response_timeout_ms: 100,
            ..InitiatorConfig::default()
        },
    )
    .bound()
    .unwrap();
    let (control, addr) = start(vec![handler]).await;

    let (status, body) = common::call(Method::POST, format!("http://{addr}/utf8string/anyone/")).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body, json!({"httpReasonPhrase": "Echo response timeout"}));

    control.shutdown().await;
    client.shutdown().await;
}

//! REST server: HTTP/1 over [`TcpServer`], one hyper connection per socket.
//!
//! Each request runs through a per-connection [`RequestAssembler`], then the
//! dispatcher. Every outcome, including internal failures, is answered with
//! a JSON reason phrase. Protocol violations additionally close the
//! connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::RestServerConfig;
use crate::lifecycle::Shutdownable;
use crate::net::{ConnectionHandler, ConnectionId, ServerError, ServerHandle, TcpServer};
use crate::observability::metrics;
use crate::rest::assembly::{AssembledRequest, AssemblyAction, HttpEvent, RequestAssembler, RequestHead};
use crate::rest::dispatcher::RestRequestDispatcher;
use crate::rest::error::{RestError, INTERNAL_ERROR_REASON};
use crate::rest::handler::Handler;
use crate::rest::result::{closing, reason_response, JsonHandlerResult, PostResponseAction};

type JsonDispatcher = RestRequestDispatcher<JsonHandlerResult>;

/// Runs post-response actions on the blocking pool, a bounded number at a time.
#[derive(Clone)]
pub struct PostResponseExecutor {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl PostResponseExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: TaskTracker::new(),
        }
    }

    pub fn execute(&self, action: PostResponseAction) {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(action).await {
                tracing::error!(error = %e, "Post-response action failed");
            }
        });
    }

    /// Lets [`idle`](Self::idle) resolve once the queued actions are done.
    pub fn close(&self) {
        self.tasks.close();
    }

    /// Resolves, after [`close`](Self::close), once every action has finished.
    pub async fn idle(&self) {
        self.tasks.wait().await
    }
}

/// Serves HTTP/1 on accepted sockets and routes requests to the dispatcher.
pub struct RestConnectionHandler {
    dispatcher: Arc<JsonDispatcher>,
    post_response: PostResponseExecutor,
}

impl ConnectionHandler for RestConnectionHandler {
    async fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        id: ConnectionId,
        shutdown: CancellationToken,
    ) {
        let assembler = Arc::new(Mutex::new(RequestAssembler::new()));
        let exchange = Exchange {
            assembler: Arc::clone(&assembler),
            dispatcher: Arc::clone(&self.dispatcher),
            post_response: self.post_response.clone(),
        };
        let service = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .service_fn(move |request: Request<Incoming>| {
                let exchange = exchange.clone();
                async move { Ok::<_, Infallible>(exchange.serve(request).await) }
            });

        let connection = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service));
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = shutdown.cancelled() => {
                tracing::debug!(connection_id = %id, "Closing REST connection gracefully");
                connection.as_mut().graceful_shutdown();
                connection.as_mut().await
            }
        };
        if let Err(e) = result {
            tracing::debug!(connection_id = %id, peer = %peer, error = %e, "REST connection ended with error");
        }
        lock(&assembler).connection_inactive();
    }

    fn shutdown_hook(&self) {
        self.dispatcher.shutdown();
        self.post_response.close();
    }
}

#[derive(Clone)]
struct Exchange {
    assembler: Arc<Mutex<RequestAssembler>>,
    dispatcher: Arc<JsonDispatcher>,
    post_response: PostResponseExecutor,
}

impl Exchange {
    async fn serve(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, mut body) = request.into_parts();
        let head = RequestHead::from_parts(&parts);

        let mut action = self.feed(HttpEvent::Head(head.clone()));
        if matches!(action, AssemblyAction::Continue) {
            // hyper writes the interim response once the body is polled
            action = self.feed(HttpEvent::Head(head.without_expectation()));
        }
        while matches!(action, AssemblyAction::Pending) {
            let event = match body.frame().await {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(chunk) => HttpEvent::Chunk(chunk),
                    Err(_) => continue,
                },
                Some(Err(e)) => HttpEvent::DecodeFailure(e.to_string()),
                None => HttpEvent::End,
            };
            action = self.feed(event);
        }

        let response = match action {
            AssemblyAction::Emit(assembled) => self.dispatch(assembled).await,
            AssemblyAction::Reject(error) | AssemblyAction::Fatal(error) => failure_response(&error),
            AssemblyAction::Pending | AssemblyAction::Continue => {
                failure_response(&RestError::Protocol("request assembly did not finish".into()))
            }
        };
        metrics::record_rest_response(response.status().as_u16());
        response
    }

    async fn dispatch(&self, assembled: AssembledRequest) -> Response<Full<Bytes>> {
        let outcome = self.dispatcher.dispatch(assembled.request).await;
        lock(&self.assembler).finish();
        match outcome {
            Ok(result) => {
                let (response, action) = result.into_response();
                if let Some(action) = action {
                    self.post_response.execute(action);
                }
                response
            }
            Err(error) => error_response(&error),
        }
    }

    fn feed(&self, event: HttpEvent) -> AssemblyAction {
        lock(&self.assembler).on_event(event)
    }
}

fn lock(assembler: &Mutex<RequestAssembler>) -> MutexGuard<'_, RequestAssembler> {
    assembler.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`error_response`], marked as the connection's last when the error is fatal.
pub fn failure_response(error: &RestError) -> Response<Full<Bytes>> {
    if error.is_fatal() {
        tracing::error!(error = %error, "REST protocol violation, closing connection");
        closing(error_response(error))
    } else {
        error_response(error)
    }
}

/// JSON response for a failed request; internal detail stays in the log.
pub fn error_response(error: &RestError) -> Response<Full<Bytes>> {
    let status = error.status();
    match error.external_message() {
        Some(reason) => {
            tracing::debug!(status = status.as_u16(), error = %error, "REST request failed");
            reason_response(status, reason)
        }
        None => {
            tracing::error!(status = status.as_u16(), error = %error, "REST request failed internally");
            reason_response(status, INTERNAL_ERROR_REASON)
        }
    }
}

/// A [`TcpServer`] serving REST handlers over HTTP/1.
pub struct RestServer {
    server: TcpServer<RestConnectionHandler>,
    dispatcher: Arc<JsonDispatcher>,
    post_response: PostResponseExecutor,
}

impl RestServer {
    /// Registers `handlers` and prepares the server; nothing is bound yet.
    pub fn new(
        config: &RestServerConfig,
        termination_timeout: Duration,
        handlers: impl IntoIterator<Item = Handler<JsonHandlerResult>>,
    ) -> Result<Self, RestError> {
        let handle = ServerHandle::new(config.name.as_str());
        let dispatcher = Arc::new(RestRequestDispatcher::new(handle.clone(), handlers)?);
        let post_response = PostResponseExecutor::new(config.post_response_workers);
        let handler = RestConnectionHandler {
            dispatcher: Arc::clone(&dispatcher),
            post_response: post_response.clone(),
        };
        Ok(Self {
            server: TcpServer::with_handle(handle, config.listener.clone(), termination_timeout, handler),
            dispatcher,
            post_response,
        })
    }

    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        self.server.start().await
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn dispatcher(&self) -> &Arc<RestRequestDispatcher<JsonHandlerResult>> {
        &self.dispatcher
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr().await
    }

    /// Resolves once a stop has been requested, e.g. by a handler.
    pub async fn closed(&self) {
        self.server.closed().await
    }

    pub fn is_active(&self) -> bool {
        self.server.is_active()
    }

    /// Drains connections, shuts the dispatcher down, then waits for
    /// queued post-response actions.
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
        self.post_response.idle().await;
    }
}

impl Shutdownable for RestServer {
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(RestServer::shutdown(self))
    }

    fn describe(&self) -> String {
        format!("REST server {}", self.server.name())
    }
}

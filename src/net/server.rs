//! Generic TCP server host shell.
//!
//! # Responsibilities
//! - Bind a bounded listener and run the accept loop
//! - Hand each accepted connection to a [`ConnectionHandler`]
//! - Stop on request and drain live connections within a bounded wait
//!
//! # Design Decisions
//! - `start` and `shutdown` are each effective at most once
//! - Stopping (via [`ServerHandle`]) only ends the accept loop and signals
//!   connections; `shutdown` additionally waits for them and runs the hook
//! - Every connection gets a child token of the server's stop token

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::lifecycle::Shutdownable;
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};

/// Pause after a failed accept so a persistent error cannot spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for server lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server {0} is already started")]
    AlreadyStarted(String),

    #[error("server {0} is stopped")]
    Stopped(String),
}

/// Serves connections accepted by a [`TcpServer`].
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve one connection until it ends or `shutdown` is cancelled.
    fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        id: ConnectionId,
        shutdown: CancellationToken,
    ) -> impl Future<Output = ()> + Send;

    /// Called exactly once, after the server has drained its connections.
    fn shutdown_hook(&self) {}
}

/// Cloneable stop trigger for a server.
///
/// Handlers keep one of these to stop the server that hosts them.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    name: Arc<str>,
    stop: CancellationToken,
}

impl ServerHandle {
    /// Create a handle for a server that has not been built yet.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            stop: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the server to stop accepting connections.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!(server = %self.name, "Server stop requested");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    fn connection_token(&self) -> CancellationToken {
        self.stop.child_token()
    }
}

impl std::fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

enum State {
    Idle,
    Running {
        local_addr: SocketAddr,
        accept: JoinHandle<()>,
    },
    Stopped,
}

/// A TCP server hosting one [`ConnectionHandler`].
pub struct TcpServer<H> {
    handle: ServerHandle,
    listener: ListenerConfig,
    termination_timeout: Duration,
    handler: Arc<H>,
    state: Mutex<State>,
    active: AtomicBool,
    connections: ConnectionTracker,
}

impl<H: ConnectionHandler> TcpServer<H> {
    /// Create a new server. Nothing is bound until [`start`](Self::start).
    pub fn new(
        name: impl Into<Arc<str>>,
        listener: ListenerConfig,
        termination_timeout: Duration,
        handler: H,
    ) -> Self {
        Self::with_handle(ServerHandle::new(name), listener, termination_timeout, handler)
    }

    /// Create a server controlled by a handle that was handed out earlier.
    pub fn with_handle(
        handle: ServerHandle,
        listener: ListenerConfig,
        termination_timeout: Duration,
        handler: H,
    ) -> Self {
        Self {
            handle,
            listener,
            termination_timeout,
            handler: Arc::new(handler),
            state: Mutex::new(State::Idle),
            active: AtomicBool::new(true),
            connections: ConnectionTracker::new(),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.connections.active_count()
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Idle if !self.handle.is_stopped() => {}
            State::Running { .. } => return Err(ServerError::AlreadyStarted(self.name().into())),
            _ => return Err(ServerError::Stopped(self.name().into())),
        }

        let listener = Listener::bind(&self.listener).await?;
        let local_addr = listener.local_addr();
        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            self.handle.clone(),
            self.connections.clone(),
        ));
        *state = State::Running { local_addr, accept };

        tracing::info!(server = %self.handle, address = %local_addr, "Server started");
        Ok(local_addr)
    }

    /// The bound address while the server is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match *self.state.lock().await {
            State::Running { local_addr, .. } => Some(local_addr),
            _ => None,
        }
    }

    /// Resolves once the server has been asked to stop.
    pub async fn closed(&self) {
        self.handle.stopped().await
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting, drain connections and run the handler's hook.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(server = %self.handle, "Server shutdown already performed");
            return;
        }
        self.handle.stop();

        let previous = std::mem::replace(&mut *self.state.lock().await, State::Stopped);
        if let State::Running { accept, .. } = previous {
            if let Err(e) = accept.await {
                tracing::warn!(server = %self.handle, error = %e, "Accept loop ended abnormally");
            }
        }

        if tokio::time::timeout(self.termination_timeout, self.connections.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                server = %self.handle,
                remaining = self.connections.active_count(),
                timeout_secs = self.termination_timeout.as_secs_f64(),
                "Connections did not drain in time"
            );
        }

        self.handler.shutdown_hook();
        tracing::info!(server = %self.handle, "Server stopped");
    }
}

impl<H: ConnectionHandler> Shutdownable for TcpServer<H> {
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(TcpServer::shutdown(self))
    }

    fn describe(&self) -> String {
        format!("TCP server {}", self.handle)
    }
}

async fn accept_loop<H: ConnectionHandler>(
    listener: Listener,
    handler: Arc<H>,
    handle: ServerHandle,
    connections: ConnectionTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = handle.stopped() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                let guard = connections.track();
                let handler = Arc::clone(&handler);
                let token = handle.connection_token();
                let server = Arc::clone(&handle.name);
                tokio::spawn(async move {
                    let id = guard.id();
                    tracing::debug!(server = %server, connection_id = %id, peer = %peer, "Serving connection");
                    handler.handle(stream, peer, id, token).await;
                    drop(permit);
                    drop(guard);
                });
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(server = %handle, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    tracing::debug!(server = %handle, "Accept loop stopped");
}

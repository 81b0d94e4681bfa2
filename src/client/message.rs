//! Correlated message envelope and its response future.
//!
//! A [`TcpMessage`] pairs a payload with a response timeout. A zero timeout
//! means the peer sends nothing back: the response future then resolves with
//! `Ok(None)` as soon as the payload has been flushed. Otherwise the future
//! resolves with the matching reply, a timeout, or a connection failure.
//!
//! Completion happens exactly once. Whoever takes the oneshot sender out of
//! the shared slot wins; every later attempt is a no-op that reports `false`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::client::connection::ConnectionHandle;
use crate::client::error::{ClientError, ClientResult};
use crate::net::ConnectionId;
use crate::observability::metrics;

/// What a response future resolves to.
pub type ResponseOutcome<R> = ClientResult<Option<TcpResponse<R>>>;

/// An outgoing payload plus the means to complete its response.
pub struct TcpMessage<M, R> {
    payload: M,
    slot: Arc<ResponseSlot<R>>,
    receiver: oneshot::Receiver<ResponseOutcome<R>>,
}

impl<M, R> TcpMessage<M, R> {
    /// Create a message. A zero `timeout` means no response is expected.
    pub fn new(payload: M, timeout: Duration) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            payload,
            slot: Arc::new(ResponseSlot::new(timeout, sender)),
            receiver,
        }
    }

    /// Create a message the peer will not answer.
    pub fn fire_and_forget(payload: M) -> Self {
        Self::new(payload, Duration::ZERO)
    }

    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn timeout(&self) -> Duration {
        self.slot.timeout
    }

    pub fn expects_response(&self) -> bool {
        self.slot.expects_response()
    }

    pub(crate) fn associate(&self, connection: ConnectionHandle) -> ClientResult<()> {
        self.slot.associate(connection)
    }

    pub(crate) fn into_parts(self) -> (M, Arc<ResponseSlot<R>>, ResponseFuture<R>) {
        let future = ResponseFuture {
            inner: Inner::Pending(self.receiver),
        };
        (self.payload, self.slot, future)
    }
}

impl<M: std::fmt::Debug, R> std::fmt::Debug for TcpMessage<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpMessage")
            .field("payload", &self.payload)
            .field("timeout", &self.slot.timeout)
            .field("connection", &self.slot.connection.get().map(ConnectionHandle::id))
            .finish()
    }
}

/// Shared completion state of one message.
pub(crate) struct ResponseSlot<R> {
    timeout: Duration,
    sender: Mutex<Option<oneshot::Sender<ResponseOutcome<R>>>>,
    settled: CancellationToken,
    connection: OnceLock<ConnectionHandle>,
}

impl<R> ResponseSlot<R> {
    fn new(timeout: Duration, sender: oneshot::Sender<ResponseOutcome<R>>) -> Self {
        Self {
            timeout,
            sender: Mutex::new(Some(sender)),
            settled: CancellationToken::new(),
            connection: OnceLock::new(),
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn expects_response(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Bind the message to the connection that sends it. Allowed once.
    pub(crate) fn associate(&self, connection: ConnectionHandle) -> ClientResult<()> {
        self.connection.set(connection).map_err(|_| {
            let existing = self
                .connection
                .get()
                .map(ConnectionHandle::id)
                .unwrap_or_default();
            ClientError::AlreadyAssociated(existing)
        })
    }

    /// Complete the response. Returns `false` if it was already completed.
    pub(crate) fn complete(&self, outcome: ResponseOutcome<R>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                self.settled.cancel();
                // The caller may have dropped the future; completion still counts.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.settled.is_cancelled()
    }

    /// Resolves once the response has been completed by anyone.
    pub(crate) async fn settled(&self) {
        self.settled.cancelled().await
    }

    /// Fail the response with a timeout and, if that won, close the connection.
    ///
    /// After a timeout the peer may still answer, so the connection can no
    /// longer be trusted to be in step with the pending queue.
    pub(crate) fn expire(&self) -> bool {
        let expired = self.complete(Err(ClientError::ResponseTimeout {
            timeout: self.timeout,
        }));
        if expired {
            metrics::record_response_timeout();
            if let Some(connection) = self.connection.get() {
                if connection.close() {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Response timed out, connection closed"
                    );
                }
            }
        }
        expired
    }
}

/// Future of a message's response.
#[must_use = "a response future does nothing unless awaited"]
pub struct ResponseFuture<R> {
    inner: Inner<R>,
}

enum Inner<R> {
    Pending(oneshot::Receiver<ResponseOutcome<R>>),
    Ready(Option<ResponseOutcome<R>>),
}

impl<R> ResponseFuture<R> {
    /// A future that has already failed.
    pub fn failed(error: ClientError) -> Self {
        Self {
            inner: Inner::Ready(Some(Err(error))),
        }
    }
}

// `R` is only ever moved out of the channel, never pinned.
impl<R> Unpin for ResponseFuture<R> {}

impl<R> Future for ResponseFuture<R> {
    type Output = ResponseOutcome<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ClientError::Cancelled))),
            Inner::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(ClientError::Cancelled)))
            }
        }
    }
}

/// A reply together with the connection it arrived on.
#[derive(Debug)]
pub struct TcpResponse<R> {
    message: R,
    connection: ConnectionHandle,
}

impl<R> TcpResponse<R> {
    pub(crate) fn new(message: R, connection: ConnectionHandle) -> Self {
        Self { message, connection }
    }

    pub fn get(&self) -> &R {
        &self.message
    }

    pub fn into_inner(self) -> R {
        self.message
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Close the connection the reply came from, e.g. after it proved invalid.
    pub fn abort(&self) {
        if self.connection.close() {
            tracing::debug!(connection_id = %self.connection.id(), "Connection aborted by caller");
        }
    }
}

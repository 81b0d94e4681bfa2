//! Pipelined client connections.
//!
//! Each connection is driven by one task that owns the framed socket and
//! the pending-response queue. Senders talk to it through an unbounded
//! command channel, so writes reach the wire in the order `send` was called.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::correlator::{Correlator, Outgoing};
use crate::client::error::{ClientError, ClientResult};
use crate::client::message::{ResponseFuture, TcpMessage};
use crate::client::scheduler::TimeoutScheduler;
use crate::net::ConnectionId;

/// Codec requirements for a client connection carrying `M` requests.
pub trait ClientCodec<M>: Encoder<M, Error = io::Error> + Decoder<Error = io::Error> + Send + 'static {}

impl<M, T> ClientCodec<M> for T where T: Encoder<M, Error = io::Error> + Decoder<Error = io::Error> + Send + 'static {}

/// Cheap, cloneable view of a connection used to close it from anywhere.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    closing: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle whose connection also closes when `parent` is cancelled.
    pub(crate) fn new(parent: &CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            closing: parent.child_token(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.closing.is_cancelled()
    }

    /// Close the connection. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closing.cancel();
        tracing::debug!(connection_id = %self.id, "Connection close requested");
        true
    }

    pub(crate) fn closing(&self) -> &CancellationToken {
        &self.closing
    }
}

/// A live pipelined connection.
pub struct TcpConnection<M, R> {
    handle: ConnectionHandle,
    commands: mpsc::UnboundedSender<Outgoing<M, R>>,
}

impl<M, R> TcpConnection<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    /// Start driving `io` with `codec` on a task tracked by `tasks`.
    pub fn spawn<T, C>(
        io: T,
        codec: C,
        scheduler: TimeoutScheduler,
        tasks: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        C: ClientCodec<M> + Decoder<Item = R>,
    {
        let handle = ConnectionHandle::new(shutdown);
        let (commands, receiver) = mpsc::unbounded_channel();
        tasks.spawn(drive(Framed::new(io, codec), receiver, handle.clone(), scheduler));
        tracing::debug!(connection_id = %handle.id(), "Client connection established");
        Self { handle, commands }
    }

    /// Queue a message for writing and return its response future.
    pub fn send(&self, message: TcpMessage<M, R>) -> ClientResult<ResponseFuture<R>> {
        if !self.handle.is_active() {
            return Err(ClientError::ConnectionClosed(self.handle.id()));
        }
        message.associate(self.handle.clone())?;
        let (payload, slot, future) = message.into_parts();
        self.commands
            .send(Outgoing { payload, slot })
            .map_err(|_| ClientError::ConnectionClosed(self.handle.id()))?;
        Ok(future)
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active() && !self.commands.is_closed()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn close(&self) -> bool {
        self.handle.close()
    }
}

enum Termination {
    Closed,
    Disconnected,
    Failed(ClientError),
}

async fn drive<T, M, C>(
    mut framed: Framed<T, C>,
    mut commands: mpsc::UnboundedReceiver<Outgoing<M, C::Item>>,
    handle: ConnectionHandle,
    scheduler: TimeoutScheduler,
) where
    T: AsyncRead + AsyncWrite + Unpin,
    C: ClientCodec<M>,
    C::Item: Send + 'static,
{
    let mut correlator = Correlator::new(handle.clone(), scheduler);
    let closing = handle.closing().clone();

    let termination = loop {
        tokio::select! {
            biased;
            _ = closing.cancelled() => break Termination::Closed,
            command = commands.recv() => match command {
                Some(outgoing) => {
                    let slot = Arc::clone(&outgoing.slot);
                    tokio::select! {
                        biased;
                        _ = closing.cancelled() => {
                            // A peer that stopped reading must not pin the socket open.
                            slot.complete(Err(ClientError::ConnectionClosed(handle.id())));
                            break Termination::Closed;
                        }
                        written = correlator.write(&mut framed, outgoing) => {
                            if let Err(e) = written {
                                break Termination::Failed(e);
                            }
                        }
                    }
                }
                None => break Termination::Closed,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(message)) => {
                    if let Err(e) = correlator.read(message) {
                        break Termination::Failed(e);
                    }
                }
                Some(Err(e)) => break Termination::Failed(ClientError::Io(e)),
                None => break Termination::Disconnected,
            },
        }
    };

    handle.close();
    commands.close();
    let mut unsent = 0;
    while let Ok(outgoing) = commands.try_recv() {
        outgoing.slot.complete(Err(ClientError::ConnectionClosed(handle.id())));
        unsent += 1;
    }

    match termination {
        Termination::Failed(e) => {
            let failed = correlator.fail_all(&e);
            tracing::error!(
                connection_id = %handle.id(),
                error = %e,
                failed_pending = failed,
                unsent,
                "Client connection failed"
            );
        }
        Termination::Closed | Termination::Disconnected => {
            let cancelled = correlator.cancel_all();
            tracing::debug!(
                connection_id = %handle.id(),
                disconnected = matches!(termination, Termination::Disconnected),
                cancelled_pending = cancelled,
                unsent,
                "Client connection closed"
            );
        }
    }
}

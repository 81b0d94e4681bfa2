//! FIFO correlation of replies with the requests that expect them.
//!
//! The peer must answer response-expecting requests in the order they were
//! written. Nothing here can detect a peer that does not; such a peer gets
//! its replies attributed to the wrong requests.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use futures_util::{Sink, SinkExt};

use crate::client::connection::ConnectionHandle;
use crate::client::error::{ClientError, ClientResult};
use crate::client::message::{ResponseSlot, TcpResponse};
use crate::client::scheduler::TimeoutScheduler;

/// A payload on its way to the wire, with its completion slot.
pub(crate) struct Outgoing<M, R> {
    pub(crate) payload: M,
    pub(crate) slot: Arc<ResponseSlot<R>>,
}

/// Pending-response queue of one connection.
///
/// Owned by the connection task, which is the only one touching it.
pub(crate) struct Correlator<R> {
    connection: ConnectionHandle,
    scheduler: TimeoutScheduler,
    pending: VecDeque<Arc<ResponseSlot<R>>>,
}

impl<R: Send + 'static> Correlator<R> {
    pub(crate) fn new(connection: ConnectionHandle, scheduler: TimeoutScheduler) -> Self {
        Self {
            connection,
            scheduler,
            pending: VecDeque::new(),
        }
    }

    /// Number of requests still waiting for a reply.
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write one payload and register it for correlation.
    ///
    /// The timer starts before the write; the queue entry is appended right
    /// after the payload enters the sink, so queue order is wire order.
    /// A message without a response is completed once the flush succeeds.
    pub(crate) async fn write<M, S>(&mut self, sink: &mut S, outgoing: Outgoing<M, R>) -> ClientResult<()>
    where
        S: Sink<M, Error = io::Error> + Unpin,
    {
        let Outgoing { payload, slot } = outgoing;
        let expects_response = slot.expects_response();
        if expects_response {
            self.scheduler.schedule_expiration(Arc::clone(&slot));
        }

        if let Err(e) = sink.feed(payload).await {
            slot.complete(Err(self.failure(&e)));
            return Err(ClientError::Io(e));
        }
        if expects_response {
            self.pending.push_back(Arc::clone(&slot));
        }

        match sink.flush().await {
            Ok(()) => {
                if !expects_response {
                    slot.complete(Ok(None));
                }
                Ok(())
            }
            Err(e) => {
                if !expects_response {
                    slot.complete(Err(self.failure(&e)));
                }
                Err(ClientError::Io(e))
            }
        }
    }

    /// Hand an inbound message to the oldest pending request.
    ///
    /// Inbound data with nothing pending is a protocol violation.
    pub(crate) fn read(&mut self, message: R) -> ClientResult<()> {
        let Some(slot) = self.pending.pop_front() else {
            return Err(ClientError::Protocol(format!(
                "unexpected inbound message on {}, no response is pending",
                self.connection.id()
            )));
        };
        let response = TcpResponse::new(message, self.connection.clone());
        if !slot.complete(Ok(Some(response))) {
            tracing::debug!(
                connection_id = %self.connection.id(),
                "Reply arrived for an already completed request, discarded"
            );
        }
        Ok(())
    }

    /// Fail every pending request because the connection failed.
    pub(crate) fn fail_all(&mut self, cause: &ClientError) -> usize {
        let mut failed = 0;
        for slot in self.pending.drain(..) {
            let error = ClientError::ConnectionFailed {
                id: self.connection.id(),
                cause: cause.to_string(),
            };
            if slot.complete(Err(error)) {
                failed += 1;
            }
        }
        failed
    }

    /// Cancel every pending request because the connection closed.
    pub(crate) fn cancel_all(&mut self) -> usize {
        self.pending
            .drain(..)
            .filter(|slot| slot.complete(Err(ClientError::Cancelled)))
            .count()
    }

    fn failure(&self, cause: &io::Error) -> ClientError {
        ClientError::ConnectionFailed {
            id: self.connection.id(),
            cause: cause.to_string(),
        }
    }
}

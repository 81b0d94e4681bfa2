//! Pipelined TCP client over a pool of connections.
//!
//! # Responsibilities
//! - Borrow a connection per send and return it as soon as the write is queued
//! - Invalidate connections whose send failed
//! - Own the pool, the timeout scheduler and every connection task
//!
//! # Design Decisions
//! - The connection goes back to the pool before its reply arrives, so later
//!   sends pipeline behind earlier ones on the same connection
//! - Cleanup failures are logged and swallowed; the caller sees the primary error
//! - Shutdown is compare-and-set guarded and runs once

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::connection::ClientCodec;
use crate::client::error::ClientError;
use crate::client::factory::{CodecFactory, TcpConnectionFactory};
use crate::client::message::{ResponseFuture, TcpMessage};
use crate::client::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::client::scheduler::TimeoutScheduler;
use crate::config::ClientConfig;
use crate::lifecycle::Shutdownable;

/// Pipelined client sending `M` requests encoded by `C`.
pub struct TcpSequentialClient<M, C>
where
    M: Send + 'static,
    C: ClientCodec<M>,
    <C as Decoder>::Item: Send + 'static,
{
    name: String,
    address: String,
    pool: Arc<ConnectionPool<TcpConnectionFactory<M, C>>>,
    scheduler: TimeoutScheduler,
    io_tasks: TaskTracker,
    io_shutdown: CancellationToken,
    active: AtomicBool,
    termination_timeout: Duration,
}

impl<M, C> TcpSequentialClient<M, C>
where
    M: Send + 'static,
    C: ClientCodec<M>,
    <C as Decoder>::Item: Send + 'static,
{
    /// Create a client. Must be called inside a Tokio runtime.
    ///
    /// Connections are opened lazily, on the first sends.
    pub fn new<F>(config: &ClientConfig, termination_timeout: Duration, codec: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let scheduler = TimeoutScheduler::new();
        let io_tasks = TaskTracker::new();
        let io_shutdown = CancellationToken::new();
        let codec: CodecFactory<C> = Arc::new(codec);
        let factory = TcpConnectionFactory::new(
            config.address.clone(),
            config.connect_timeout(),
            codec,
            scheduler.clone(),
            io_tasks.clone(),
            io_shutdown.clone(),
        );
        let pool = Arc::new(ConnectionPool::new(factory, PoolConfig::from_client(config)));
        pool.spawn_evictor(&io_tasks, io_shutdown.clone());

        tracing::info!(
            client = %config.name,
            address = %config.address,
            workers = config.workers,
            "Client created"
        );

        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            pool,
            scheduler,
            io_tasks,
            io_shutdown,
            active: AtomicBool::new(true),
            termination_timeout,
        }
    }

    /// Send a message and return the future of its response.
    ///
    /// Failures to borrow or write are reported through the returned future.
    pub async fn send(&self, message: TcpMessage<M, <C as Decoder>::Item>) -> ResponseFuture<<C as Decoder>::Item> {
        if !self.is_active() {
            return ResponseFuture::failed(ClientError::Inactive(self.describe_self()));
        }

        let connection = match self.pool.borrow().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(client = %self.name, error = %e, "Can't obtain connection from pool");
                return ResponseFuture::failed(ClientError::Pool(e));
            }
        };

        match connection.send(message) {
            Ok(response) => {
                if let Err(e) = self.pool.give_back(connection) {
                    tracing::warn!(client = %self.name, error = %e, "Swallowed error while returning connection");
                }
                response
            }
            Err(e) => {
                tracing::error!(
                    client = %self.name,
                    connection_id = %connection.id(),
                    error = %e,
                    "Send failed, invalidating connection"
                );
                self.pool.invalidate(connection);
                ResponseFuture::failed(e)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop accepting sends, close every connection, stop timers and close the pool.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(client = %self.name, "Client shutdown already performed");
            return;
        }
        tracing::info!(client = %self.name, "Client shutting down");

        self.io_shutdown.cancel();
        self.io_tasks.close();
        if tokio::time::timeout(self.termination_timeout, self.io_tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                client = %self.name,
                remaining = self.io_tasks.len(),
                "Client connections did not terminate in time"
            );
        }
        self.scheduler.shutdown(self.termination_timeout).await;
        self.pool.close();

        tracing::info!(client = %self.name, "Client shut down");
    }

    fn describe_self(&self) -> String {
        format!("client {} ({})", self.name, self.address)
    }
}

impl<M, C> Shutdownable for TcpSequentialClient<M, C>
where
    M: Send + 'static,
    C: ClientCodec<M>,
    <C as Decoder>::Item: Send + 'static,
{
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(TcpSequentialClient::shutdown(self))
    }

    fn describe(&self) -> String {
        self.describe_self()
    }
}

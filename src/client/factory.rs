//! Pooled-connection factory backed by connect-with-timeout.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::connection::{ClientCodec, TcpConnection};
use crate::client::error::ClientError;
use crate::client::pool::PooledObjectFactory;
use crate::client::scheduler::TimeoutScheduler;
use crate::net::connect_with_timeout;

/// Builds a fresh codec for every new connection.
pub type CodecFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Creates [`TcpConnection`]s to one fixed address.
pub struct TcpConnectionFactory<M, C> {
    address: String,
    connect_timeout: Duration,
    codec: CodecFactory<C>,
    scheduler: TimeoutScheduler,
    io_tasks: TaskTracker,
    io_shutdown: CancellationToken,
    _requests: PhantomData<fn(M)>,
}

impl<M, C> TcpConnectionFactory<M, C> {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        codec: CodecFactory<C>,
        scheduler: TimeoutScheduler,
        io_tasks: TaskTracker,
        io_shutdown: CancellationToken,
    ) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            codec,
            scheduler,
            io_tasks,
            io_shutdown,
            _requests: PhantomData,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl<M, C> PooledObjectFactory for TcpConnectionFactory<M, C>
where
    M: Send + 'static,
    C: ClientCodec<M>,
    <C as Decoder>::Item: Send + 'static,
{
    type Object = TcpConnection<M, <C as Decoder>::Item>;

    async fn create(&self) -> Result<Self::Object, ClientError> {
        let stream = connect_with_timeout(&self.address, self.connect_timeout).await?;
        Ok(TcpConnection::spawn(
            stream,
            (self.codec)(),
            self.scheduler.clone(),
            &self.io_tasks,
            &self.io_shutdown,
        ))
    }

    fn validate(&self, object: &Self::Object) -> bool {
        object.is_active()
    }

    fn destroy(&self, object: Self::Object) {
        if object.close() {
            tracing::debug!(connection_id = %object.id(), address = %self.address, "Pooled connection destroyed");
        }
    }
}

//! Byte relay between a front-end and a back-end connection.
//!
//! Each direction reads a chunk, writes it to the other side and only reads
//! again once that write has been flushed. A slow receiver therefore stalls
//! its sender instead of growing a buffer.
//!
//! When one side reaches EOF the other side is flushed and shut down, then
//! both directions stop. A failed read or write stops both directions at
//! once and the sockets are dropped.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::net::ConnectError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Front end to back end.
    Upstream,
    /// Back end to front end.
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("back end {address} did not accept the connection within {timeout:?}")]
    ConnectTimeout {
        address: String,
        timeout: std::time::Duration,
    },

    #[error(transparent)]
    Connect(ConnectError),

    #[error("reading {direction} failed: {source}")]
    Read {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    #[error("forwarding {direction} failed: {source}")]
    Forward {
        direction: Direction,
        #[source]
        source: io::Error,
    },
}

impl From<ConnectError> for ProxyError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Timeout { address, timeout } => ProxyError::ConnectTimeout { address, timeout },
            other => ProxyError::Connect(other),
        }
    }
}

/// Bytes moved in each direction by one relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub upstream: u64,
    pub downstream: u64,
}

/// Relays bytes between `front` and `back` until either side closes, a
/// transfer fails or `shutdown` fires.
pub async fn relay<F, B>(
    front: F,
    back: B,
    buffer_size: usize,
    shutdown: &CancellationToken,
) -> Result<RelayStats, ProxyError>
where
    F: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (front_read, front_write) = tokio::io::split(front);
    let (back_read, back_write) = tokio::io::split(back);
    let closing = shutdown.child_token();

    let (upstream, downstream) = tokio::join!(
        forward(front_read, back_write, Direction::Upstream, buffer_size, closing.clone()),
        forward(back_read, front_write, Direction::Downstream, buffer_size, closing),
    );
    Ok(RelayStats {
        upstream: upstream?,
        downstream: downstream?,
    })
}

/// Copies `reader` into `writer` one chunk at a time.
pub async fn forward<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    buffer_size: usize,
    closing: CancellationToken,
) -> Result<u64, ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            read = reader.read(&mut buffer) => read,
        };
        let n = match read {
            Ok(0) => {
                close_gracefully(&mut writer, direction).await;
                closing.cancel();
                break;
            }
            Ok(n) => n,
            Err(source) => {
                closing.cancel();
                return Err(ProxyError::Read { direction, source });
            }
        };

        let written = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            written = write_chunk(&mut writer, &buffer[..n]) => written,
        };
        if let Err(source) = written {
            closing.cancel();
            return Err(ProxyError::Forward { direction, source });
        }
        total += n as u64;
        metrics::record_proxy_bytes(direction.as_str(), n);
    }
    Ok(total)
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

async fn close_gracefully<W: AsyncWrite + Unpin>(writer: &mut W, direction: Direction) {
    if let Err(e) = writer.flush().await {
        tracing::debug!(direction = %direction, error = %e, "Flush before close failed");
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(direction = %direction, error = %e, "Shutdown of peer failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, ReadBuf};

    /// Endless source of `x` bytes that counts how often it was read.
    struct CountingReader {
        reads: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let fill = vec![b'x'; buf.remaining()];
            buf.put_slice(&fill);
            Poll::Ready(Ok(()))
        }
    }

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn relays_both_directions_and_propagates_close() {
        let (client, front) = duplex(64);
        let (back, server) = duplex(64);
        let shutdown = CancellationToken::new();
        let relay = tokio::spawn(async move { relay(front, back, 16, &shutdown).await });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        client_write.write_all(b"hello back end").await.unwrap();
        let mut received = [0u8; 14];
        server_read.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello back end");

        server_write.write_all(b"hi front").await.unwrap();
        let mut echoed = [0u8; 8];
        client_read.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hi front");

        client_write.shutdown().await.unwrap();
        let mut rest = Vec::new();
        server_read.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { upstream: 14, downstream: 8 });
    }

    #[tokio::test]
    async fn reading_pauses_until_the_write_completes() {
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader { reads: Arc::clone(&reads) };
        let (writer, mut sink) = duplex(8);
        let closing = CancellationToken::new();
        let task = tokio::spawn(forward(reader, writer, Direction::Upstream, 16, closing.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 1, "read again while a write was pending");

        let mut chunk = [0u8; 16];
        sink.read_exact(&mut chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        closing.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn failed_write_stops_both_directions() {
        let reads = Arc::new(AtomicUsize::new(0));
        let closing = CancellationToken::new();
        let err = forward(
            CountingReader { reads: Arc::clone(&reads) },
            FailingWriter,
            Direction::Downstream,
            8,
            closing.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::Forward { direction: Direction::Downstream, .. }));
        assert!(closing.is_cancelled());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_token_stops_an_idle_relay() {
        let (_client, front) = duplex(8);
        let (back, _server) = duplex(8);
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let relay = tokio::spawn(async move { relay(front, back, 8, &shutdown).await });
        stopper.cancel();
        assert_eq!(relay.await.unwrap().unwrap(), RelayStats::default());
    }

    #[test]
    fn connect_timeouts_are_distinct() {
        let err: ProxyError = ConnectError::Timeout {
            address: "10.0.0.1:1".into(),
            timeout: Duration::from_millis(5),
        }
        .into();
        assert!(matches!(err, ProxyError::ConnectTimeout { .. }));
    }
}

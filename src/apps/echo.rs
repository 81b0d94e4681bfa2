//! Echo back end and the length-tracking codec its clients use.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::config::EchoConfig;
use crate::net::{ConnectionHandler, ConnectionId, TcpServer};

/// Client codec for an echo peer.
///
/// Every encoded payload is expected back verbatim, so the decoder frames
/// replies by the lengths of the payloads sent, in order.
#[derive(Debug, Default)]
pub struct EchoCodec {
    expected: VecDeque<usize>,
}

impl EchoCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of replies still expected.
    pub fn pending(&self) -> usize {
        self.expected.len()
    }
}

impl Encoder<Bytes> for EchoCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "echo payload must not be empty",
            ));
        }
        dst.extend_from_slice(&payload);
        self.expected.push_back(payload.len());
        tracing::trace!(length = payload.len(), pending = self.expected.len(), "Echo request encoded");
        Ok(())
    }
}

impl Decoder for EchoCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.expected.front().copied() {
            Some(length) if src.len() >= length => {
                self.expected.pop_front();
                Ok(Some(src.split_to(length).freeze()))
            }
            Some(_) => Ok(None),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no bytes were expected, but {} arrived", src.len()),
            )),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let missing = self.expected.front().map_or(0, |length| length - src.len());
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{missing} more bytes were expected"),
                ))
            }
        }
    }
}

/// Writes every received byte straight back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    async fn handle(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        id: ConnectionId,
        shutdown: CancellationToken,
    ) {
        let (mut reader, mut writer) = stream.split();
        let copied = tokio::select! {
            _ = shutdown.cancelled() => return,
            copied = tokio::io::copy(&mut reader, &mut writer) => copied,
        };
        match copied {
            Ok(bytes) => tracing::debug!(connection_id = %id, peer = %peer, bytes, "Echo connection closed"),
            Err(e) => tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Echo connection failed"),
        }
    }
}

pub type EchoServer = TcpServer<EchoHandler>;

impl TcpServer<EchoHandler> {
    pub fn echo(config: &EchoConfig, termination_timeout: Duration) -> Self {
        TcpServer::new(
            config.name.as_str(),
            config.listener.clone(),
            termination_timeout,
            EchoHandler,
        )
    }
}

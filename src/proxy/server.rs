//! Reverse proxy host: pairs every accepted front-end connection with a new
//! connection to the configured back end.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::net::{connect_with_timeout, ConnectionHandler, ConnectionId, TcpServer};
use crate::observability::metrics;
use crate::proxy::pairing::{relay, ProxyError};

/// Front-end connection handler of the reverse proxy.
#[derive(Debug, Clone)]
pub struct ProxyConnectionHandler {
    backend_address: String,
    connect_timeout: Duration,
    buffer_size: usize,
}

impl ProxyConnectionHandler {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            backend_address: config.backend_address.clone(),
            connect_timeout: config.connect_timeout(),
            buffer_size: config.buffer_size,
        }
    }

    pub fn backend_address(&self) -> &str {
        &self.backend_address
    }
}

impl ConnectionHandler for ProxyConnectionHandler {
    async fn handle(
        &self,
        front: TcpStream,
        peer: SocketAddr,
        id: ConnectionId,
        shutdown: CancellationToken,
    ) {
        // the front end is not read until the back end is connected
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = connect_with_timeout(&self.backend_address, self.connect_timeout) => connected,
        };
        let back = match connected {
            Ok(back) => back,
            Err(e) => {
                let error = ProxyError::from(e);
                tracing::warn!(connection_id = %id, peer = %peer, error = %error, "Back end unavailable, closing front end");
                return;
            }
        };

        tracing::debug!(connection_id = %id, peer = %peer, backend = %self.backend_address, "Pairing established");
        metrics::record_pairing_opened();
        match relay(front, back, self.buffer_size, &shutdown).await {
            Ok(stats) => tracing::debug!(
                connection_id = %id,
                upstream_bytes = stats.upstream,
                downstream_bytes = stats.downstream,
                "Pairing closed"
            ),
            Err(e) => tracing::warn!(connection_id = %id, error = %e, "Pairing failed"),
        }
        metrics::record_pairing_closed();
    }
}

/// TCP server relaying every connection to one back end.
pub type ReverseProxyServer = TcpServer<ProxyConnectionHandler>;

impl TcpServer<ProxyConnectionHandler> {
    pub fn reverse_proxy(config: &ProxyConfig, termination_timeout: Duration) -> Self {
        TcpServer::new(
            config.name.as_str(),
            config.listener.clone(),
            termination_timeout,
            ProxyConnectionHandler::new(config),
        )
    }
}

//! Outbound connect with a bounded wait.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

/// Failure to establish an outbound connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("TCP connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("TCP connect to {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::Timeout { .. })
    }
}

/// Connect to `address`, giving up after `timeout`.
pub async fn connect_with_timeout(address: &str, timeout: Duration) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(address, error = %e, "Failed to set TCP_NODELAY");
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(ConnectError::Io {
            address: address.to_string(),
            source,
        }),
        Err(_) => Err(ConnectError::Timeout {
            address: address.to_string(),
            timeout,
        }),
    }
}

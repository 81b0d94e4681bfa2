use std::time::Duration;

use thiserror::Error;

use crate::client::pool::PoolError;
use crate::net::{ConnectError, ConnectionId};

/// Result alias used across the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures reported through a client's response futures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("TCP connect to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error(transparent)]
    Connect(ConnectError),

    #[error("no response within {timeout:?}")]
    ResponseTimeout { timeout: Duration },

    #[error("can't obtain a connection from the pool: {0}")]
    Pool(#[from] PoolError),

    #[error("{0} isn't active")]
    Inactive(String),

    #[error("message is already associated with {0}")]
    AlreadyAssociated(ConnectionId),

    #[error("{0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("{id} failed: {cause}")]
    ConnectionFailed { id: ConnectionId, cause: String },

    #[error("response was cancelled because its connection closed")]
    Cancelled,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConnectError> for ClientError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Timeout { address, timeout } => {
                ClientError::ConnectTimeout { address, timeout }
            }
            other => ClientError::Connect(other),
        }
    }
}

impl ClientError {
    /// True for response timeouts and connect timeouts, including those
    /// raised while the pool was creating a connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::ResponseTimeout { .. } => true,
            ClientError::ConnectTimeout { .. } => true,
            ClientError::Pool(PoolError::Create(e)) => e.is_timeout(),
            _ => false,
        }
    }
}

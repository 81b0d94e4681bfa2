//! Pipelined TCP client subsystem.
//!
//! # Data Flow
//! ```text
//! TcpSequentialClient::send(TcpMessage)
//!     → pool.rs (borrow: idle or newly connected, validated)
//!     → connection.rs (associate, queue command, return to pool)
//!     → connection task: scheduler.rs timer → write → correlator.rs FIFO append
//!     → (network)
//!     → connection task: read → correlator pops head → ResponseFuture completes
//! ```
//!
//! # Design Decisions
//! - One task per connection owns the socket and the pending queue; no locks
//! - Replies are matched purely by position; the peer must answer in order
//! - A response timeout closes its connection, failing everything queued behind it
//! - Zero timeout means fire-and-forget: completed on flush, never queued

pub mod connection;
mod correlator;
pub mod error;
pub mod factory;
pub mod message;
pub mod pool;
pub mod scheduler;
pub mod sequential;

pub use connection::{ClientCodec, ConnectionHandle, TcpConnection};
pub use error::{ClientError, ClientResult};
pub use message::{ResponseFuture, ResponseOutcome, TcpMessage, TcpResponse};
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolStats, PooledObjectFactory};
pub use scheduler::TimeoutScheduler;
pub use sequential::TcpSequentialClient;

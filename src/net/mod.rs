//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → server.rs (accept loop, per-connection task, drain on shutdown)
//!     → connection.rs (ids, live-connection tracking)
//!     → ConnectionHandler (REST, proxy, echo)
//!
//! Outgoing TCP connection
//!     → connect.rs (connect with timeout)
//!     → client pool / proxy pairing
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Connect timeouts are reported distinctly from other connect failures

pub mod connect;
pub mod connection;
pub mod listener;
pub mod server;

pub use connect::{connect_with_timeout, ConnectError};
pub use connection::{ConnectionId, ConnectionTracker};
pub use server::{ConnectionHandler, ServerError, ServerHandle, TcpServer};

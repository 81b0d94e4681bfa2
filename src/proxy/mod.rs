//! Transport-transparent TCP reverse proxy.

pub mod pairing;
pub mod server;

pub use pairing::{forward, relay, Direction, ProxyError, RelayStats};
pub use server::{ProxyConnectionHandler, ReverseProxyServer};

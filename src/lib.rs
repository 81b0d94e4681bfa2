//! TCP service platform: a pipelined TCP client, a REST dispatcher and a
//! transparent reverse proxy, all hosted on Tokio.

pub mod apps;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod rest;

pub use client::{TcpMessage, TcpSequentialClient};
pub use config::schema::PlatformConfig;
pub use lifecycle::Shutdown;
pub use net::server::{ServerHandle, TcpServer};
pub use proxy::ReverseProxyServer;
pub use rest::{RestRequest, RestRequestDispatcher, RestServer};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger or control-plane stop → stop accept → drain → Shutdownable hooks
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: applications first, control plane last
//! - Every drain has a bounded wait
//! - Shutdown of every component is idempotent

pub mod shutdown;
pub mod signals;

pub use shutdown::{shutdown_all, Shutdown, Shutdownable};

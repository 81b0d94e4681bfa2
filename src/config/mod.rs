//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PlatformConfig (validated, immutable)
//!     → sections handed by value to each subsystem constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ClientConfig;
pub use schema::EchoConfig;
pub use schema::InitiatorConfig;
pub use schema::ListenerConfig;
pub use schema::PlatformConfig;
pub use schema::ProxyConfig;
pub use schema::RestServerConfig;
pub use schema::ShutdownConfig;
pub use schema::ObservabilityConfig;

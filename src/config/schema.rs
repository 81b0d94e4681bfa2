//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the platform.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for every application hosted by the platform.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PlatformConfig {
    /// REST control server settings.
    pub control: RestServerConfig,

    /// Echo back-end settings.
    pub echo: EchoConfig,

    /// Reverse proxy settings.
    pub proxy: ProxyConfig,

    /// Pipelined client settings.
    pub client: ClientConfig,

    /// Initiator application settings.
    pub initiator: InitiatorConfig,

    /// Bounded waits used while shutting things down.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: 1_024,
        }
    }
}

impl ListenerConfig {
    /// Listener on the given address with the default connection limit.
    pub fn on(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Self::default()
        }
    }
}

/// REST control server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestServerConfig {
    /// Server name used in logs and shutdown reports.
    pub name: String,

    pub listener: ListenerConfig,

    /// Concurrent post-response actions allowed on the blocking pool.
    pub post_response_workers: usize,
}

impl Default for RestServerConfig {
    fn default() -> Self {
        Self {
            name: "control".to_string(),
            listener: ListenerConfig::on("127.0.0.1:8081"),
            post_response_workers: 2,
        }
    }
}

/// Echo back-end configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EchoConfig {
    pub name: String,
    pub listener: ListenerConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            name: "echo".to_string(),
            listener: ListenerConfig::on("127.0.0.1:9000"),
        }
    }
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub name: String,

    /// Front-end listener.
    pub listener: ListenerConfig,

    /// The single back-end every front-end connection is paired with.
    pub backend_address: String,

    /// Back-end connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Read buffer size per relay direction.
    pub buffer_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: "proxy".to_string(),
            listener: ListenerConfig::on("127.0.0.1:9100"),
            backend_address: "127.0.0.1:9000".to_string(),
            connect_timeout_ms: 1_000,
            buffer_size: 8 * 1024,
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Pipelined client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,

    /// Remote address every pooled connection targets.
    pub address: String,

    /// Worker concurrency; also the maximum number of pooled connections.
    pub workers: usize,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle time after which the evictor destroys a pooled connection.
    pub min_evictable_idle_ms: u64,

    /// Period of the background eviction sweep.
    pub eviction_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
            address: "127.0.0.1:9000".to_string(),
            workers: 4,
            connect_timeout_ms: 1_000,
            min_evictable_idle_ms: 30_000,
            eviction_interval_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

/// Initiator application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InitiatorConfig {
    /// How long an echo request waits for its reply, in milliseconds.
    pub response_timeout_ms: u64,

    /// Compare each echo with the bytes that were sent.
    pub validate_response: bool,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1_000,
            validate_response: true,
        }
    }
}

impl InitiatorConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Bounded waits used while shutting down.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on draining connections and tasks, in seconds.
    pub termination_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            termination_timeout_secs: 10,
        }
    }
}

impl ShutdownConfig {
    pub fn termination_timeout(&self) -> Duration {
        Duration::from_secs(self.termination_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: PlatformConfig = toml::from_str("").unwrap();
        assert_eq!(config.client.min_evictable_idle(), Duration::from_secs(30));
        assert_eq!(config.shutdown.termination_timeout(), Duration::from_secs(10));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: PlatformConfig = toml::from_str(
            r#"
            [client]
            workers = 8

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.client.workers, 8);
        assert_eq!(config.client.connect_timeout_ms, 1_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}

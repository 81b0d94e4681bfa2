//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0)
//! - Validate that every address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PlatformConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{ListenerConfig, PlatformConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &PlatformConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_listener(&mut errors, "control.listener", &config.control.listener);
    check_positive(
        &mut errors,
        "control.post_response_workers",
        config.control.post_response_workers as u64,
    );

    check_listener(&mut errors, "echo.listener", &config.echo.listener);

    check_listener(&mut errors, "proxy.listener", &config.proxy.listener);
    check_address(&mut errors, "proxy.backend_address", &config.proxy.backend_address);
    check_positive(&mut errors, "proxy.connect_timeout_ms", config.proxy.connect_timeout_ms);
    check_positive(&mut errors, "proxy.buffer_size", config.proxy.buffer_size as u64);
    if config.proxy.listener.bind_address == config.proxy.backend_address {
        errors.push(ValidationError::new(
            "proxy.backend_address",
            "must differ from the proxy listen address",
        ));
    }

    check_address(&mut errors, "client.address", &config.client.address);
    check_positive(&mut errors, "client.workers", config.client.workers as u64);
    check_positive(&mut errors, "client.connect_timeout_ms", config.client.connect_timeout_ms);
    check_positive(&mut errors, "client.eviction_interval_ms", config.client.eviction_interval_ms);

    check_positive(
        &mut errors,
        "initiator.response_timeout_ms",
        config.initiator.response_timeout_ms,
    );

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_listener(errors: &mut Vec<ValidationError>, field: &str, listener: &ListenerConfig) {
    check_address(errors, &format!("{field}.bind_address"), &listener.bind_address);
    check_positive(errors, &format!("{field}.max_connections"), listener.max_connections as u64);
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{value}' is not a socket address"),
        ));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}

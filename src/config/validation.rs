//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (concurrency > 0, retry bounds ordered)
//! - Check accept entries are parseable (ports, forward targets)
//!
//! Rule-level problems (TLS without a host, duplicates, port conflicts)
//! are not configuration errors here: the server reports them as error
//! events when registering and keeps serving the remaining rules.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LaterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use crate::config::schema::LaterConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
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

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &LaterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not an IP address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let replay = &config.replay;
    if replay.concurrency == 0 {
        errors.push(ValidationError::new("replay.concurrency", "must be greater than 0"));
    }
    if replay.batch_size == 0 {
        errors.push(ValidationError::new("replay.batch_size", "must be greater than 0"));
    }
    if replay.backoff_unit_ms == 0 || replay.backoff_unit_ms > replay.backoff_max_ms {
        errors.push(ValidationError::new(
            "replay.backoff_unit_ms",
            "must be greater than 0 and not exceed backoff_max_ms",
        ));
    }
    if !(replay.retry_multiplier >= 1.0) {
        errors.push(ValidationError::new("replay.retry_multiplier", "must be at least 1.0"));
    }
    if replay.retry_floor_secs > replay.retry_max_secs {
        errors.push(ValidationError::new(
            "replay.retry_floor_secs",
            "must not exceed retry_max_secs",
        ));
    }

    if config.timeouts.connect_secs == 0 || config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts", "timeouts must be greater than 0"));
    }
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }
    if config.storage.keybase.is_empty() {
        errors.push(ValidationError::new("storage.keybase", "must not be empty"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    for (i, accept) in config.accept.iter().enumerate() {
        let field = format!("accept[{}]", i);
        if accept.port == Some(0) {
            errors.push(ValidationError::new(&field, "port must be greater than 0"));
        }
        if let Some(forward) = &accept.forward {
            if url::Url::parse(&format!("http://{}/", forward)).is_err() {
                errors.push(ValidationError::new(
                    &field,
                    format!("forward '{}' is not a valid host", forward),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

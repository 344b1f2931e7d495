//! TOML configuration for accept rules, storage and replay.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LaterConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Accept rules; each entry may expand into several rules.
    pub accept: Vec<AcceptConfig>,

    /// Durable queue backend.
    pub storage: StorageConfig,

    /// Replay engine tuning.
    pub replay: ReplayConfig,

    /// Connect and request timeouts.
    pub timeouts: TimeoutConfig,

    /// Inbound request limits.
    pub security: SecurityConfig,

    /// Logging and Prometheus export.
    pub observability: ObservabilityConfig,
}

/// Settings shared by every accept port.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// IP address every accept port is bound on (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Maximum concurrent requests per port (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            max_connections: 10_000,
        }
    }
}

/// One accept rule description.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AcceptConfig {
    /// Host header to match (exact match); absent accepts any host.
    pub host: Option<String>,

    /// Listen port; defaults to 443 with TLS, 80 without.
    pub port: Option<u16>,

    /// Path prefix to match.
    pub path: Option<String>,

    /// Additional path prefixes.
    pub paths: Vec<String>,

    /// Method to accept.
    pub method: Option<String>,

    /// Additional methods.
    pub methods: Vec<String>,

    /// Host to deliver to instead of the request's Host header.
    pub forward: Option<String>,

    /// Certificate for this host; requires `host`.
    pub tls: Option<TlsConfig>,

    /// Replay over HTTPS even when accepted over plaintext.
    pub httpsonly: bool,
}

/// TLS certificate files for an accept rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Intermediate/CA certificates appended to the served chain.
    #[serde(default)]
    pub ca_paths: Vec<String>,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    #[default]
    Redis,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub driver: StorageDriver,

    /// Redis connection URL.
    pub url: String,

    /// Namespace prefix for queue, request and log keys.
    pub keybase: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::Redis,
            url: "redis://127.0.0.1/".to_string(),
            keybase: "later:".to_string(),
        }
    }
}

/// Replay engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Start replaying queued requests.
    pub enabled: bool,

    /// Maximum concurrent deliveries.
    pub concurrency: usize,

    /// Maximum requests pulled per refill cycle.
    pub batch_size: usize,

    /// Unit of the idle backoff sequence in milliseconds.
    pub backoff_unit_ms: u64,

    /// Upper bound of the idle backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Minimum delay before a retry in seconds.
    pub retry_floor_secs: u64,

    /// Growth factor between consecutive retry delays.
    pub retry_multiplier: f64,

    /// Maximum delay before a retry in seconds.
    pub retry_max_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: 20,
            batch_size: 50,
            backoff_unit_ms: 1_000,
            backoff_max_ms: 30 * 60 * 1_000,
            retry_floor_secs: 60,
            retry_multiplier: 2.0,
            retry_max_secs: 24 * 60 * 60,
        }
    }
}

/// Inbound handling and outbound delivery timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (inbound handling, outbound delivery) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Inbound request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 << 20,
        }
    }
}

/// Log verbosity and the optional metrics listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Base log level; `-v` and `-q` shift it.
    pub log_level: String,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

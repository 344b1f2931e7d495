//! Configuration loading from disk and from CLI option strings.
//!
//! Option strings are comma-separated `name:value` pairs, e.g.
//! `host:api.example.com,port:8080,tls:cert.pem:key.pem`. Everything after
//! the first colon belongs to the value. Unknown names are logged and
//! skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::schema::{AcceptConfig, LaterConfig, StorageConfig, StorageDriver, TlsConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    /// A CLI option string carried an unusable value.
    Option(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Option(msg) => write!(f, "Invalid option: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<LaterConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<LaterConfig, ConfigError> {
    let config: LaterConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Split an option string into name/value pairs.
///
/// Entries without a value, with an empty name, or repeating an earlier
/// name are logged and skipped.
pub fn parse_options(opts: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();

    for opt in opts.split(',').filter(|o| !o.is_empty()) {
        match opt.split_once(':') {
            Some((name, value)) if !name.is_empty() && !result.contains_key(name) => {
                result.insert(name.to_string(), value.to_string());
            }
            _ => tracing::warn!(option = %opt, "invalid or unrecognized option"),
        }
    }

    result
}

/// Build an accept rule description from an `--accept` option string.
pub fn accept_from_options(opts: &str) -> Result<AcceptConfig, ConfigError> {
    let mut accept = AcceptConfig::default();

    for (name, value) in parse_options(opts) {
        match name.as_str() {
            "host" => accept.host = Some(value),
            "port" => {
                let port = value
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Option(format!("port '{}' is not a valid port", value)))?;
                accept.port = Some(port);
            }
            "path" => accept.path = Some(value),
            "method" => accept.method = Some(value),
            "forward" => accept.forward = Some(value),
            "httpsonly" => accept.httpsonly = parse_flag(&value)?,
            "tls" => accept.tls = Some(tls_from_option(&value)?),
            other => tracing::warn!(option = %other, "unrecognized accept option ignored"),
        }
    }

    Ok(accept)
}

/// Layer a `--storage` option string over an existing storage section.
pub fn storage_from_options(opts: &str, base: StorageConfig) -> Result<StorageConfig, ConfigError> {
    let mut storage = base;

    for (name, value) in parse_options(opts) {
        match name.as_str() {
            "driver" => {
                storage.driver = match value.as_str() {
                    "redis" => StorageDriver::Redis,
                    "memory" => StorageDriver::Memory,
                    other => {
                        return Err(ConfigError::Option(format!("unknown storage driver '{}'", other)))
                    }
                }
            }
            "url" => storage.url = value,
            "keybase" => storage.keybase = value,
            other => tracing::warn!(option = %other, "unrecognized storage option ignored"),
        }
    }

    Ok(storage)
}

/// `<cert>:<key>[:<ca>...]`
fn tls_from_option(value: &str) -> Result<TlsConfig, ConfigError> {
    let mut parts = value.split(':').map(str::to_string);
    match (parts.next(), parts.next()) {
        (Some(cert_path), Some(key_path)) if !cert_path.is_empty() && !key_path.is_empty() => Ok(TlsConfig {
            cert_path,
            key_path,
            ca_paths: parts.filter(|p| !p.is_empty()).collect(),
        }),
        _ => Err(ConfigError::Option(format!("tls '{}' must be <cert>:<key>[:<ca>...]", value))),
    }
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value {
        "" | "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(ConfigError::Option(format!("'{}' is not a boolean", other))),
    }
}

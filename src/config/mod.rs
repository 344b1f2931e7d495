//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI option strings
//!     → loader.rs (parse & deserialize, merge CLI accept/storage options)
//!     → validation.rs (semantic checks)
//!     → LaterConfig (validated, immutable)
//!     → shared by value with the server, storage and replay engine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Duplicate accept rules are not a validation error; they are
//!   reported when the rule is registered

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AcceptConfig;
pub use schema::LaterConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ReplayConfig;
pub use schema::StorageConfig;
pub use schema::StorageDriver;
pub use schema::TimeoutConfig;
pub use schema::TlsConfig;

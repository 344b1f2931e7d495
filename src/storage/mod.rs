//! Durable request queue.
//!
//! # Data Flow
//! ```text
//! accept handler → queue(req) → key
//!                                ├─ body stored under key
//!                                └─ key appended to FIFO order
//! replay engine  → unqueue() → (req, key)   (pop + fetch + delete)
//!                → log(key, outcome)         (append-only audit)
//! ```
//!
//! # Design Decisions
//! - One capability trait; the backend is chosen from configuration and
//!   injected as `Arc<dyn Storage>`
//! - Keys are content addresses: `keybase + sha1-hex(json(req))`
//! - An empty queue is `Ok(None)`; backend failures are always `Err`

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use crate::config::{StorageConfig, StorageDriver};
use crate::relay::{Outcome, SerializedRequest};

pub use memory::MemoryStorage;
pub use self::redis::RedisStorage;

/// Failure talking to, or decoding data from, a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for StorageError {
    fn from(err: ::redis::RedisError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a request and append its key to the queue.
    async fn queue(&self, req: &SerializedRequest) -> Result<String, StorageError>;

    /// Pop the oldest queued request, removing its stored body.
    async fn unqueue(&self) -> Result<Option<(SerializedRequest, String)>, StorageError>;

    /// Record the outcome of a delivery attempt.
    async fn log(&self, key: &str, outcome: &Outcome) -> Result<(), StorageError>;
}

/// Content address of a serialized request.
pub fn content_key(keybase: &str, req: &SerializedRequest) -> Result<String, StorageError> {
    let encoded = serde_json::to_vec(req)?;
    Ok(format!("{}{:x}", keybase, Sha1::digest(&encoded)))
}

/// Open the backend named by the storage configuration.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config.driver {
        StorageDriver::Memory => Ok(Arc::new(MemoryStorage::new(&config.keybase))),
        StorageDriver::Redis => {
            let storage = RedisStorage::connect(&config.url, &config.keybase).await?;
            Ok(Arc::new(storage))
        }
    }
}

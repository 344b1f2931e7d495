//! Process-local storage backend.
//!
//! Nothing survives a restart; used for development, single-node
//! deployments and tests. Only the most recent log entries are kept.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{content_key, Storage, StorageError};
use crate::relay::{LogEntry, Outcome, SerializedRequest};

/// Log entries retained by [`MemoryStorage::new`].
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

pub struct MemoryStorage {
    keybase: String,
    bodies: DashMap<String, SerializedRequest>,
    order: Mutex<VecDeque<String>>,
    log: Mutex<VecDeque<LogEntry>>,
    log_capacity: usize,
}

impl MemoryStorage {
    pub fn new(keybase: impl Into<String>) -> Self {
        Self::with_log_capacity(keybase, DEFAULT_LOG_CAPACITY)
    }

    /// Keep at most `log_capacity` log entries, dropping the oldest.
    pub fn with_log_capacity(keybase: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            keybase: keybase.into(),
            bodies: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            log: Mutex::new(VecDeque::with_capacity(log_capacity.min(DEFAULT_LOG_CAPACITY))),
            log_capacity,
        }
    }

    /// Number of keys waiting in the queue.
    pub async fn len(&self) -> usize {
        self.order.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.order.lock().await.is_empty()
    }

    /// Stored request for a key, without dequeuing it.
    pub fn peek(&self, key: &str) -> Option<SerializedRequest> {
        self.bodies.get(key).map(|entry| entry.value().clone())
    }

    /// Queued keys, oldest first.
    pub async fn keys(&self) -> Vec<String> {
        self.order.lock().await.iter().cloned().collect()
    }

    /// Retained log entries, oldest first.
    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.log.lock().await.iter().cloned().collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn queue(&self, req: &SerializedRequest) -> Result<String, StorageError> {
        let key = content_key(&self.keybase, req)?;

        // body first so the key is never ordered ahead of its data
        let mut order = self.order.lock().await;
        self.bodies.insert(key.clone(), req.clone());
        order.push_back(key.clone());

        Ok(key)
    }

    async fn unqueue(&self) -> Result<Option<(SerializedRequest, String)>, StorageError> {
        let mut order = self.order.lock().await;

        while let Some(key) = order.pop_front() {
            match self.bodies.remove(&key) {
                Some((key, req)) => return Ok(Some((req, key))),
                None => tracing::debug!(key = %key, "skipping queue entry without stored request"),
            }
        }

        Ok(None)
    }

    async fn log(&self, key: &str, outcome: &Outcome) -> Result<(), StorageError> {
        let entry = LogEntry::new(key, outcome);
        tracing::trace!(key = %key, status = ?entry.res.as_ref().map(|r| r.status_code), error = ?entry.err, "log");

        if self.log_capacity == 0 {
            return Ok(());
        }
        let mut log = self.log.lock().await;
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(entry);
        Ok(())
    }
}

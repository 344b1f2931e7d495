//! Lifecycle events.
//!
//! The server and replay engine publish typed events on an [`EventBus`];
//! operators and tests subscribe to observe what the relay is doing. No
//! internal behavior depends on anyone listening.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::relay::SerializedRequest;

#[derive(Debug, Clone)]
pub enum LaterEvent {
    /// A listener is bound.
    Listening { addr: SocketAddr, tls: bool },

    /// An accept rule was registered.
    Accepting { rule: String, forward: Option<String> },

    /// The replay loop started.
    Replaying,

    /// A refill cycle started.
    Refill,

    /// Every request dispatched by a refill cycle has finished.
    Drain,

    /// The replay loop is idle for `delay`.
    Backoff { delay: Duration },

    /// A due request was pulled and handed to a worker.
    Pull { key: String, request: Arc<SerializedRequest> },

    /// A request scheduled in the future was put back.
    Wait { key: String, until: DateTime<Utc> },

    /// A worker is sending a request to its origin.
    Replay { key: String, request: Arc<SerializedRequest> },

    /// The origin answered and delivery is final.
    Response { key: String, request: Arc<SerializedRequest>, status: u16 },

    /// Delivery ended without a usable response.
    Failure { key: String, request: Arc<SerializedRequest>, error: String },

    /// A failed attempt was queued again.
    Retry {
        key: String,
        request: Arc<SerializedRequest>,
        status: Option<u16>,
        error: Option<String>,
    },

    /// An inbound request was answered.
    Request { status: u16, summary: String },

    /// A configuration or storage failure.
    Error { context: String, message: String },
}

impl LaterEvent {
    pub fn error(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        LaterEvent::Error {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Short event name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            LaterEvent::Listening { .. } => "listening",
            LaterEvent::Accepting { .. } => "accepting",
            LaterEvent::Replaying => "replaying",
            LaterEvent::Refill => "refill",
            LaterEvent::Drain => "drain",
            LaterEvent::Backoff { .. } => "backoff",
            LaterEvent::Pull { .. } => "pull",
            LaterEvent::Wait { .. } => "wait",
            LaterEvent::Replay { .. } => "replay",
            LaterEvent::Response { .. } => "response",
            LaterEvent::Failure { .. } => "failure",
            LaterEvent::Retry { .. } => "retry",
            LaterEvent::Request { .. } => "request",
            LaterEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast topic for [`LaterEvent`]s. Cloning shares the topic.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LaterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: LaterEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LaterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

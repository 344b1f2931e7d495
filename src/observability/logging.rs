//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Render lifecycle events from the event bus as log lines
//!
//! # Design Decisions
//! - RUST_LOG overrides everything; otherwise the configured level,
//!   raised by each -v and lowered to errors-only by -q
//! - Inbound and delivery results log at info, queue traffic at debug

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::events::{EventBus, LaterEvent};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Level after applying CLI verbosity to the configured level.
pub fn effective_level(configured: &str, verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    let base = LEVELS
        .iter()
        .position(|l| l.eq_ignore_ascii_case(configured.trim()))
        .unwrap_or(2);
    LEVELS[(base + verbose as usize).min(LEVELS.len() - 1)]
}

/// Install the global subscriber.
pub fn init(configured: &str, verbose: u8, quiet: bool) -> Result<(), TryInitError> {
    let level = effective_level(configured, verbose, quiet);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("http_later={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Log every event published on `bus` until the bus is dropped.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn log_event(event: &LaterEvent) {
    match event {
        LaterEvent::Listening { addr, tls } => {
            tracing::info!(address = %addr, tls = *tls, "listening");
        }
        LaterEvent::Accepting { rule, forward } => match forward {
            Some(forward) => tracing::info!(rule = %rule, forward = %forward, "accepting requests"),
            None => tracing::info!(rule = %rule, "accepting requests"),
        },
        LaterEvent::Replaying => tracing::info!("replaying queued requests"),
        LaterEvent::Refill => tracing::debug!("refilling from queue"),
        LaterEvent::Drain => tracing::debug!("drained"),
        LaterEvent::Backoff { delay } => {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off");
        }
        LaterEvent::Pull { key, request } => {
            tracing::debug!(key = %key, request = %request.describe(), "pull");
        }
        LaterEvent::Wait { key, until } => {
            tracing::debug!(key = %key, until = %until, "waiting for scheduled time");
        }
        LaterEvent::Replay { key, request } => {
            tracing::debug!(key = %key, request = %request.describe(), "play");
        }
        LaterEvent::Response { key, request, status } => {
            tracing::info!(key = %key, status = *status, request = %request.describe(), "delivered");
        }
        LaterEvent::Failure { key, request, error } => {
            tracing::warn!(key = %key, error = %error, request = %request.describe(), "delivery failed");
        }
        LaterEvent::Retry { key, request, status, error } => {
            tracing::warn!(
                key = %key,
                status = ?status,
                error = error.as_deref().unwrap_or(""),
                request = %request.describe(),
                "retry scheduled"
            );
        }
        LaterEvent::Request { status, summary } => {
            if *status < 400 {
                tracing::info!(status = *status, request = %summary, "request");
            } else {
                tracing::warn!(status = *status, request = %summary, "request rejected");
            }
        }
        LaterEvent::Error { context, message } => {
            tracing::error!(context = %context, error = %message, "error");
        }
    }
}

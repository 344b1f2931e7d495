//! http-later: accept HTTP requests now, deliver them later.
//!
//! Inbound requests matching an accept rule are serialized into a durable
//! queue and answered `202 Accepted` with a correlation key. A replay
//! engine pulls queued requests, delivers them to their origin, and
//! retries, reschedules or reports the outcome according to `X-Later-*`
//! headers carried by each request.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod relay;
pub mod routing;
pub mod storage;

// Delivery
pub mod replay;
pub mod resilience;

// Cross-cutting concerns
pub mod events;
pub mod lifecycle;
pub mod observability;

pub use config::LaterConfig;
pub use events::{EventBus, LaterEvent};
pub use http::LaterServer;
pub use lifecycle::Shutdown;
pub use replay::ReplayEngine;
pub use storage::Storage;

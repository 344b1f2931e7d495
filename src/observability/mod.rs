//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! server / replay engine
//!     → events::EventBus ──→ logging.rs (one log line per lifecycle event)
//!     → metrics.rs (counters recorded where the work happens)
//!
//! Consumers:
//!     → stdout (tracing fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`key`, `status`) rather than formatted strings
//! - Verbosity from RUST_LOG, else config level adjusted by -v / -q
//! - Metrics are cheap (atomic increments) and no-ops until installed

pub mod logging;
pub mod metrics;

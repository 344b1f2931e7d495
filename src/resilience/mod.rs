//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Replay cycle pulled nothing:
//!     → backoff.rs IdleBackoff (Fibonacci delay before the next cycle)
//! Delivery attempt finished:
//!     → retries.rs is_success (transport errors and retry-on statuses fail)
//!     → retries.rs RetryPolicy (decrement attempts, push Date forward)
//! ```
//!
//! # Design Decisions
//! - Backoff state is owned by the replay engine, never global
//! - Transport errors are always retryable; status codes only when the
//!   request lists them in X-Later-Retry-On
//! - Retry delays grow multiplicatively from a floor, capped, with jitter

pub mod backoff;
pub mod retries;

pub use backoff::IdleBackoff;
pub use retries::{is_success, RetryPolicy};

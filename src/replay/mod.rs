//! Replay subsystem.
//!
//! # Data Flow
//! ```text
//! run loop
//!     → engine.rs refill: storage.unqueue() up to batch_size
//!         ├─ scheduled in the future → storage.queue() again (wait)
//!         └─ due → worker pool (bounded by a semaphore)
//!     → worker: sender.rs send → storage.log
//!         ├─ success or last attempt → callback, done
//!         └─ failure → retry policy → storage.queue()
//!     → drain pool → backoff when idle
//! ```

pub mod engine;
pub mod sender;

pub use engine::{AttemptOutcome, RefillReport, ReplayEngine};
pub use sender::{prepare_outbound, CallbackPayload, HttpSender, OutboundRequest, Sender};

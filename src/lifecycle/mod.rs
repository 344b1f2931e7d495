//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Storage → Accept rules → Replay engine → Listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Finish in-flight deliveries → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage first, then rules, then listeners
//! - A bad accept rule is reported and skipped; storage or bind
//!   failures are fatal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, StartupError};

//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! RuleSet ports (port → TLS?)
//!     → listener.rs (bind one listener per port)
//!     → tls.rs (SNI: server name → accept rule certificate)
//!     → Hand off to HTTP layer (http::server)
//! ```
//!
//! # Design Decisions
//! - Rules sharing a port share one listener
//! - Certificates are chosen per handshake from the live rule set
//! - Unknown server names fail the handshake

pub mod listener;
pub mod tls;

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (net::listener)
//!     → server.rs (Axum setup, middleware, accept handler)
//!     → routing::RuleSet (host → 503, path → 404, method → 405)
//!     → request.rs (serialize, normalize X-Later-* headers)
//!     → storage.queue()
//!     → response.rs (202 + X-Later-Key)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::serialize_request;
pub use server::{BoundServer, LaterServer, ServerError};

//! Serialized HTTP messages and their delivery metadata.
//!
//! # Data Flow
//! ```text
//! live inbound request
//!     → http::request (serializer)
//!     → SerializedRequest (headers.rs + message.rs)
//!     → storage (JSON encoded, content addressed)
//!     → replay engine reads RequestMeta (meta.rs)
//!     → sender rebuilds an outbound request
//!     → SerializedResponse | TransportError
//! ```
//!
//! # Design Decisions
//! - Headers keep insertion order and casing; lookups are case-insensitive
//! - Delivery metadata lives in reserved `X-Later-*` headers on the wire,
//!   but is read and written through the typed `RequestMeta`
//! - Bodies are fully buffered; no streaming

pub mod headers;
pub mod message;
pub mod meta;

pub use headers::Headers;
pub use message::{Body, LogEntry, Outcome, SerializedRequest, SerializedResponse, TransportError};
pub use meta::{RequestMeta, Security};

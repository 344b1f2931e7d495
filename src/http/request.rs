//! Inbound request serialization.
//!
//! # Responsibilities
//! - Capture method, path+query, version, headers and the full body
//! - Drop `Transfer-Encoding` and recompute `Content-Length`
//! - Normalize `X-Later-TLS` and stamp forwarding and uniqueness headers
//!
//! # Design Decisions
//! - Never rejects: malformed bodies are stored verbatim
//! - Repeated header names are folded into one comma-separated value
//! - HTTP/2 requests carry their host in the authority; it is stored as
//!   `Host` so replay sees the same thing an HTTP/1 request would

use axum::body::Bytes;
use axum::http::request::Parts;
use axum::http::{header, Version};

use crate::relay::meta::{Security, X_LATER_HOST, X_LATER_NONCE, X_LATER_TLS};
use crate::relay::{Headers, SerializedRequest};
use crate::routing::AcceptRule;

/// Version string stored for an HTTP version.
pub fn version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Host the client addressed: the `Host` header, else the URI authority.
pub fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
}

/// Serialize an accepted request for storage.
///
/// `encrypted` is whether the request arrived over TLS.
pub fn serialize_request(parts: &Parts, body: Bytes, rule: &AcceptRule, encrypted: bool) -> SerializedRequest {
    let mut headers = Headers::new();
    let mut requested: Option<Security> = None;

    for (name, value) in parts.headers.iter() {
        if name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes());
        if name.as_str().eq_ignore_ascii_case(X_LATER_TLS) {
            requested = requested.or_else(|| Security::parse(&value));
            continue;
        }
        headers.append(name.as_str(), value);
    }

    if !headers.contains("Host") {
        if let Some(authority) = parts.uri.authority() {
            headers.set("Host", authority.as_str());
        }
    }

    let security = match requested {
        Some(Security::Insecure) if !rule.httpsonly() => Security::Insecure,
        Some(Security::Secure) => Security::Secure,
        _ if rule.httpsonly() => Security::Secure,
        Some(Security::Insecure) | None if encrypted => Security::Secure,
        _ => Security::Insecure,
    };
    headers.set(X_LATER_TLS, security.as_str());

    if let Some(forward) = rule.forward() {
        if !headers.contains(X_LATER_HOST) {
            headers.set(X_LATER_HOST, forward);
        }
    }
    headers.set(X_LATER_NONCE, uuid::Uuid::new_v4().to_string());

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = SerializedRequest::new(parts.method.as_str(), url);
    request.http_version = version_string(parts.version).to_string();
    request.headers = headers;
    request.set_body(body.to_vec());
    request
}

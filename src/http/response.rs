//! Responses to inbound requests.
//!
//! Accepted requests get `202` with the storage key; routing failures get
//! plain-text status responses.

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::relay::meta::Security;

const KEY_HEADER: HeaderName = HeaderName::from_static("x-later-key");
const SCHEME_HEADER: HeaderName = HeaderName::from_static("x-later-scheme");

fn plain(status: StatusCode, message: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], message).into_response()
}

/// `202 Accepted` carrying the storage key and the replay scheme.
pub fn accepted(key: &str, security: Security) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::ACCEPTED;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(KEY_HEADER, value);
    }
    headers.insert(SCHEME_HEADER, HeaderValue::from_static(security.scheme()));
    response
}

pub fn not_found() -> Response {
    plain(StatusCode::NOT_FOUND, "Not Found")
}

/// `405` listing the methods the matching rules accept.
pub fn method_not_allowed(allowed: &[String]) -> Response {
    let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

/// No rule on this port serves the requested host.
pub fn unknown_host() -> Response {
    plain(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
}

pub fn payload_too_large() -> Response {
    plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
}

/// The request could not be stored.
pub fn storage_failure() -> Response {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

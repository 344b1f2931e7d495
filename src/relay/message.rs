//! Storable request/response records.

use std::ops::Deref;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::headers::Headers;
use super::meta::{RequestMeta, Security, X_LATER_HOST, X_LATER_KEY};

/// A fully buffered message body.
///
/// Encoded in JSON as a plain string when it is valid UTF-8 and as
/// `{"base64": "..."}` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body(Vec<u8>);

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Body {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => {
                #[derive(Serialize)]
                struct Encoded {
                    base64: String,
                }
                Encoded { base64: STANDARD.encode(&self.0) }.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Encoded { base64: String },
            Buffer { data: Vec<u8> },
            Raw(Vec<u8>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Ok(Body(text.into_bytes())),
            Repr::Encoded { base64 } => STANDARD
                .decode(base64)
                .map(Body)
                .map_err(serde::de::Error::custom),
            Repr::Buffer { data } | Repr::Raw(data) => Ok(Body(data)),
        }
    }
}

/// A request captured at accept time and replayed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequest {
    pub method: String,
    /// Path and query string.
    pub url: String,
    pub http_version: String,
    pub headers: Headers,
    #[serde(default)]
    pub body: Body,
}

impl SerializedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let mut request = Self {
            method: method.into(),
            url: url.into(),
            http_version: "1.1".to_string(),
            headers: Headers::new(),
            body: Body::default(),
        };
        request.set_body(Vec::new());
        request
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.set_body(body);
        self
    }

    /// Replace the body and recompute `Content-Length` from it.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
        self.headers.remove("Transfer-Encoding");
        self.headers.set("Content-Length", self.body.len().to_string());
    }

    /// Parse the delivery metadata carried in reserved headers.
    pub fn meta(&self) -> RequestMeta {
        RequestMeta::from_headers(&self.headers)
    }

    /// Write delivery metadata back into the reserved headers.
    pub fn apply_meta(&mut self, meta: &RequestMeta) {
        meta.write_to(&mut self.headers);
    }

    /// Absolute URL the request will be replayed against.
    pub fn target_url(&self) -> String {
        let scheme = self.meta().security.unwrap_or(Security::Secure).scheme();
        let host = self
            .headers
            .get(X_LATER_HOST)
            .or_else(|| self.headers.get("Host"))
            .unwrap_or("<nohost>");
        format!("{}://{}{}", scheme, host, self.url)
    }

    /// One-line description used in logs.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} HTTP/{} {{{}[{}]}}",
            self.headers.get(X_LATER_KEY).unwrap_or("<nokey>"),
            self.method,
            self.target_url(),
            self.http_version,
            self.headers.get("Content-Type").unwrap_or("<notype>"),
            self.body.len()
        )
    }
}

/// An origin response to a replayed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResponse {
    pub http_version: String,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    #[serde(default)]
    pub body: Body,
}

impl SerializedResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            http_version: "1.1".to_string(),
            status_code,
            status_message: String::new(),
            headers: Headers::new(),
            body: Body::default(),
        }
    }
}

/// Failure to obtain any response from the origin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid delivery target: {0}")]
    InvalidTarget(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Result of one delivery attempt.
pub type Outcome = Result<SerializedResponse, TransportError>;

/// Audit record appended by `Storage::log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<SerializedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl LogEntry {
    pub fn new(key: &str, outcome: &Outcome) -> Self {
        let (res, err) = match outcome {
            Ok(response) => (Some(response.clone()), None),
            Err(error) => (None, Some(error.to_string())),
        };
        Self {
            key: key.to_string(),
            at: Utc::now(),
            res,
            err,
        }
    }
}

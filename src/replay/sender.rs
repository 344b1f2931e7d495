//! Outbound delivery.
//!
//! Turns a stored request back into a live HTTP request, sends it to its
//! origin, and captures the full response. Also posts final outcomes to
//! caller-supplied callback URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use url::Url;

use crate::config::TimeoutConfig;
use crate::relay::meta::{Security, X_LATER_HOST, X_LATER_SERVER};
use crate::relay::{Headers, Outcome, SerializedRequest, SerializedResponse, TransportError};

/// Body posted to `X-Later-Callback`.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub req: SerializedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<SerializedResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl CallbackPayload {
    pub fn new(req: &SerializedRequest, outcome: &Outcome) -> Self {
        match outcome {
            Ok(res) => Self {
                req: req.clone(),
                res: Some(res.clone()),
                err: None,
            },
            Err(err) => Self {
                req: req.clone(),
                res: None,
                err: Some(err.to_string()),
            },
        }
    }
}

#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver a stored request to its origin.
    async fn send(&self, req: &SerializedRequest) -> Outcome;

    /// Report a final outcome to a callback URL.
    async fn notify(&self, url: &Url, payload: &CallbackPayload) -> Result<(), TransportError>;
}

/// A stored request rewritten for the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Strip hop-by-hop headers, apply the host override, and resolve the
/// absolute target URL.
pub fn prepare_outbound(req: &SerializedRequest) -> Result<OutboundRequest, TransportError> {
    let meta = req.meta();
    let mut headers = req.headers.clone();
    headers.strip_hop_by_hop();

    if let Some(forward) = headers.remove(X_LATER_HOST).filter(|h| !h.is_empty()) {
        if let Some(original) = headers.get("Host").map(str::to_string) {
            headers.set(X_LATER_SERVER, original);
        }
        headers.set("Host", forward);
    }

    let host = headers
        .get("Host")
        .ok_or_else(|| TransportError::InvalidTarget("request has no Host".to_string()))?;
    let scheme = meta.security.unwrap_or(Security::Secure).scheme();
    let target = format!("{}://{}{}", scheme, host, req.url);
    let url = Url::parse(&target).map_err(|e| TransportError::InvalidTarget(format!("{}: {}", target, e)))?;

    Ok(OutboundRequest {
        method: req.method.clone(),
        url,
        headers,
        body: req.body.as_bytes().to_vec(),
    })
}

/// [`Sender`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.request_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, req: &SerializedRequest) -> Outcome {
        let outbound = prepare_outbound(req)?;
        let method = reqwest::Method::from_bytes(outbound.method.as_bytes())
            .map_err(|e| TransportError::InvalidTarget(e.to_string()))?;

        let response = self
            .client
            .request(method, outbound.url)
            .headers(header_map(&outbound.headers))
            .body(outbound.body)
            .send()
            .await
            .map_err(transport_error)?;

        let http_version = version_string(response.version());
        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(SerializedResponse {
            http_version: http_version.to_string(),
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec().into(),
        })
    }

    async fn notify(&self, url: &Url, payload: &CallbackPayload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Other(format!("callback answered {}", response.status())))
        }
    }
}

fn header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::debug!(header = %name, "dropping header not valid on the wire"),
        }
    }
    map
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidTarget(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn version_string(version: reqwest::Version) -> &'static str {
    match version {
        reqwest::Version::HTTP_09 => "0.9",
        reqwest::Version::HTTP_10 => "1.0",
        reqwest::Version::HTTP_2 => "2.0",
        reqwest::Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> SerializedRequest {
        SerializedRequest::new("POST", "/hooks?x=1")
            .with_header("Host", "relay.example.com")
            .with_header("Connection", "keep-alive")
            .with_header("Keep-Alive", "timeout=5")
            .with_header("Proxy-Authorization", "Basic abc")
            .with_header("Upgrade", "h2c")
            .with_header("Content-Type", "application/json")
            .with_body("{}")
    }

    #[test]
    fn test_prepare_strips_hop_by_hop() {
        let outbound = prepare_outbound(&stored()).unwrap();
        for name in ["Connection", "Keep-Alive", "Proxy-Authorization", "Upgrade"] {
            assert!(!outbound.headers.contains(name), "{} survived", name);
        }
        assert_eq!(outbound.headers.get("Content-Type"), Some("application/json"));
        assert_eq!(outbound.url.as_str(), "https://relay.example.com/hooks?x=1");
        assert_eq!(outbound.body, b"{}");
    }

    #[test]
    fn test_prepare_applies_host_override() {
        let req = stored()
            .with_header("X-Later-Host", "origin.internal:8080")
            .with_header("X-Later-TLS", "insecure");
        let outbound = prepare_outbound(&req).unwrap();

        assert_eq!(outbound.headers.get("Host"), Some("origin.internal:8080"));
        assert_eq!(outbound.headers.get("X-Later-Server"), Some("relay.example.com"));
        assert!(!outbound.headers.contains("X-Later-Host"));
        assert_eq!(outbound.url.as_str(), "http://origin.internal:8080/hooks?x=1");
    }

    #[test]
    fn test_prepare_insecure_marker() {
        let req = stored().with_header("X-Later-Insecure", "1");
        assert_eq!(prepare_outbound(&req).unwrap().url.scheme(), "http");
    }

    #[test]
    fn test_prepare_requires_host() {
        let req = SerializedRequest::new("GET", "/");
        assert!(matches!(prepare_outbound(&req), Err(TransportError::InvalidTarget(_))));
    }

    #[test]
    fn test_callback_payload_shape() {
        let req = SerializedRequest::new("POST", "/a");
        let ok = serde_json::to_value(CallbackPayload::new(&req, &Ok(SerializedResponse::new(201)))).unwrap();
        assert_eq!(ok["res"]["statusCode"], 201);
        assert!(ok.get("err").is_none());

        let failed = CallbackPayload::new(&req, &Err(TransportError::Connect("refused".into())));
        let failed = serde_json::to_value(failed).unwrap();
        assert!(failed.get("res").is_none());
        assert_eq!(failed["req"]["method"], "POST");
        assert!(failed["err"].as_str().unwrap().contains("refused"));
    }
}

//! Typed view of the reserved `X-Later-*` delivery headers.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use super::headers::Headers;

pub const X_LATER_KEY: &str = "X-Later-Key";
pub const X_LATER_HOST: &str = "X-Later-Host";
pub const X_LATER_SERVER: &str = "X-Later-Server";
pub const X_LATER_TLS: &str = "X-Later-TLS";
pub const X_LATER_INSECURE: &str = "X-Later-Insecure";
pub const X_LATER_ATTEMPTS: &str = "X-Later-Attempts";
pub const X_LATER_RETRY_ON: &str = "X-Later-Retry-On";
pub const X_LATER_RETRY_AFTER: &str = "X-Later-Retry-After";
pub const X_LATER_CALLBACK: &str = "X-Later-Callback";
pub const X_LATER_NONCE: &str = "X-Later-Nonce";
pub const X_LATER_SCHEME: &str = "X-Later-Scheme";
pub const DATE: &str = "Date";

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Transport security used when the request is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Secure,
    Insecure,
}

impl Security {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("secure") => Some(Security::Secure),
            v if v.eq_ignore_ascii_case("insecure") => Some(Security::Insecure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Security::Secure => "secure",
            Security::Insecure => "insecure",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Security::Secure => "https",
            Security::Insecure => "http",
        }
    }
}

/// Delivery metadata for a stored request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    /// Correlation key returned to the original caller.
    pub key: Option<String>,
    /// Host the request is delivered to instead of its `Host` header.
    pub forward_host: Option<String>,
    pub security: Option<Security>,
    /// Remaining attempts as stored; see `remaining_attempts`.
    pub attempts: Option<u32>,
    /// Response status codes that cause a retry.
    pub retry_on: BTreeSet<u16>,
    /// Earliest time the request may be sent (`Date`).
    pub not_before: Option<DateTime<Utc>>,
    /// Delay used for the previous retry.
    pub retry_after: Option<Duration>,
    pub callback: Option<Url>,
}

impl RequestMeta {
    pub fn from_headers(headers: &Headers) -> Self {
        let security = if headers.contains(X_LATER_INSECURE) {
            Some(Security::Insecure)
        } else {
            headers.get(X_LATER_TLS).and_then(Security::parse)
        };

        Self {
            key: headers.get(X_LATER_KEY).map(str::to_string),
            forward_host: headers
                .get(X_LATER_HOST)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
            security,
            attempts: headers.get(X_LATER_ATTEMPTS).map(parse_attempts),
            retry_on: headers.get(X_LATER_RETRY_ON).map(parse_status_list).unwrap_or_default(),
            not_before: headers.get(DATE).and_then(parse_http_date),
            retry_after: headers
                .get(X_LATER_RETRY_AFTER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
            callback: headers.get(X_LATER_CALLBACK).and_then(|v| Url::parse(v.trim()).ok()),
        }
    }

    /// Write every field back to its header; absent fields remove the header.
    pub fn write_to(&self, headers: &mut Headers) {
        write_opt(headers, X_LATER_KEY, self.key.clone());
        write_opt(headers, X_LATER_HOST, self.forward_host.clone());
        if self.security.is_some() {
            headers.remove(X_LATER_INSECURE);
        }
        write_opt(headers, X_LATER_TLS, self.security.map(|s| s.as_str().to_string()));
        write_opt(headers, X_LATER_ATTEMPTS, self.attempts.map(|a| a.to_string()));
        let retry_on = (!self.retry_on.is_empty()).then(|| {
            self.retry_on
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",")
        });
        write_opt(headers, X_LATER_RETRY_ON, retry_on);
        write_opt(headers, DATE, self.not_before.map(format_http_date));
        write_opt(headers, X_LATER_RETRY_AFTER, self.retry_after.map(|d| d.as_secs().to_string()));
        write_opt(headers, X_LATER_CALLBACK, self.callback.as_ref().map(Url::to_string));
    }

    /// Attempts left; one when unspecified.
    pub fn remaining_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1)
    }

    /// True when the request is scheduled after `now`.
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|at| at > now)
    }
}

fn write_opt(headers: &mut Headers, name: &str, value: Option<String>) {
    match value {
        Some(value) => headers.set(name, value),
        None => {
            headers.remove(name);
        }
    }
}

/// Unparseable counts mean no attempts; negative counts clamp to zero.
fn parse_attempts(value: &str) -> u32 {
    value
        .trim()
        .parse::<i64>()
        .map(|n| n.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0)
}

fn parse_status_list(value: &str) -> BTreeSet<u16> {
    value
        .split(',')
        .filter_map(|code| code.trim().parse::<u16>().ok())
        .collect()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE).to_string()
}

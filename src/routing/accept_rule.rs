//! Accept rules.
//!
//! # Responsibilities
//! - Describe one routable (host, port, path, method, TLS, forward) combination
//! - Expand multi-valued specs into concrete rules
//! - Match host (exact, port stripped), path (prefix) and method (exact)
//! - Render the canonical form used for duplicate detection

use std::fmt;

use crate::config::AcceptConfig;
use crate::net::tls::CertificateMaterial;

/// The parts of an inbound request that rules match on.
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget<'a> {
    /// Host header value, possibly with a port suffix.
    pub host: &'a str,
    /// Path and query string.
    pub path: &'a str,
    pub method: &'a str,
}

impl<'a> RequestTarget<'a> {
    pub fn new(host: &'a str, path: &'a str, method: &'a str) -> Self {
        Self { host, path, method }
    }
}

/// A single accept rule.
#[derive(Debug, Clone)]
pub struct AcceptRule {
    host: Option<String>,
    port: u16,
    path: Option<String>,
    method: Option<String>,
    tls: Option<CertificateMaterial>,
    forward: Option<String>,
    httpsonly: bool,
}

impl AcceptRule {
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn tls(&self) -> Option<&CertificateMaterial> {
        self.tls.as_ref()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn forward(&self) -> Option<&str> {
        self.forward.as_deref()
    }

    pub fn httpsonly(&self) -> bool {
        self.httpsonly
    }

    pub fn check_host(&self, host: &str) -> bool {
        match &self.host {
            None => true,
            Some(expected) => expected == strip_port(host),
        }
    }

    pub fn check_path(&self, path: &str) -> bool {
        match &self.path {
            None => true,
            Some(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    pub fn check_method(&self, method: &str) -> bool {
        match &self.method {
            None => true,
            Some(expected) => expected == method,
        }
    }

    pub fn matches(&self, target: &RequestTarget<'_>) -> bool {
        self.check_host(target.host) && self.check_path(target.path) && self.check_method(target.method)
    }

    /// Canonical `METHOD scheme://host:port/path` form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AcceptRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let std_port = if self.is_tls() { 443 } else { 80 };
        let scheme = if self.is_tls() || self.httpsonly { "https" } else { "http" };

        if let Some(method) = &self.method {
            write!(f, "{} ", method)?;
        }
        write!(f, "{}://{}", scheme, self.host.as_deref().unwrap_or("<any>"))?;
        if self.port != std_port {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(self.path.as_deref().unwrap_or("/"))
    }
}

/// Strip a `:port` suffix, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

/// A rule description that may list several paths and methods.
#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub paths: Vec<String>,
    pub methods: Vec<String>,
    pub forward: Option<String>,
    pub tls: Option<CertificateMaterial>,
    pub httpsonly: bool,
}

impl RuleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a `RuleSpec` from configuration; TLS material is loaded by the caller.
    pub fn from_config(config: &AcceptConfig, tls: Option<CertificateMaterial>) -> Self {
        let mut paths = config.paths.clone();
        paths.extend(config.path.clone());
        let mut methods = config.methods.clone();
        methods.extend(config.method.clone());

        Self {
            host: config.host.clone().filter(|h| !h.is_empty()),
            port: config.port.filter(|p| *p > 0),
            paths,
            methods,
            forward: config.forward.clone().filter(|f| !f.is_empty()),
            tls,
            httpsonly: config.httpsonly,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    pub fn forward(mut self, host: impl Into<String>) -> Self {
        self.forward = Some(host.into());
        self
    }

    pub fn tls(mut self, material: CertificateMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    pub fn httpsonly(mut self, httpsonly: bool) -> Self {
        self.httpsonly = httpsonly;
        self
    }

    /// Expand into one rule per (path, method) pair.
    ///
    /// An empty path or method list expands to a single wildcard.
    pub fn expand(&self) -> Vec<AcceptRule> {
        let port = match self.port {
            Some(p) if p > 0 => p,
            _ if self.tls.is_some() => 443,
            _ => 80,
        };
        let paths: Vec<Option<&String>> = if self.paths.is_empty() {
            vec![None]
        } else {
            self.paths.iter().map(Some).collect()
        };
        let methods: Vec<Option<&String>> = if self.methods.is_empty() {
            vec![None]
        } else {
            self.methods.iter().map(Some).collect()
        };

        let mut rules = Vec::with_capacity(paths.len() * methods.len());
        for path in &paths {
            for method in &methods {
                rules.push(AcceptRule {
                    host: self.host.clone(),
                    port,
                    path: path.cloned(),
                    method: method.cloned(),
                    tls: self.tls.clone(),
                    forward: self.forward.clone(),
                    httpsonly: self.httpsonly,
                });
            }
        }
        rules
    }
}

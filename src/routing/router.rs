//! Accept-rule registry and request routing.
//!
//! # Responsibilities
//! - Store registered rules, rejecting duplicates and invalid TLS rules
//! - Decide how an inbound request on a port is answered
//!
//! # Design Decisions
//! - Readers (listeners, SNI resolver) load a snapshot without locking
//! - Writers serialize through a mutex so the duplicate check and the
//!   insert are one step

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::routing::accept_rule::{AcceptRule, RequestTarget};

/// Rule registration failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("duplicate accept rule {0}")]
    Duplicate(String),

    #[error("TLS accept rule {0} requires a host for SNI")]
    TlsWithoutHost(String),

    #[error("cannot mix TLS and plaintext rules on port {0}")]
    PortConflict(u16),
}

/// How an inbound request should be answered.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    Accept(Arc<AcceptRule>),
    /// No rule on this port serves the requested host.
    UnknownHost,
    /// The host is served but no rule accepts the path.
    NotFound,
    /// Host and path are served; the listed methods are allowed.
    MethodNotAllowed(Vec<String>),
}

/// The registered accept rules of a server.
#[derive(Debug)]
pub struct RuleSet {
    rules: ArcSwap<Vec<Arc<AcceptRule>>>,
    write: Mutex<()>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
        }
    }

    /// Register a rule. On error the set is unchanged.
    pub fn register(&self, rule: AcceptRule) -> Result<Arc<AcceptRule>, RuleError> {
        let canonical = rule.canonical();
        if rule.is_tls() && rule.host().is_none() {
            return Err(RuleError::TlsWithoutHost(canonical));
        }

        let _guard = self.write.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.rules.load_full();

        if current.iter().any(|r| r.canonical() == canonical) {
            return Err(RuleError::Duplicate(canonical));
        }
        if current
            .iter()
            .any(|r| r.port() == rule.port() && r.is_tls() != rule.is_tls())
        {
            return Err(RuleError::PortConflict(rule.port()));
        }

        let rule = Arc::new(rule);
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(rule.clone());
        self.rules.store(Arc::new(next));
        Ok(rule)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<AcceptRule>>> {
        self.rules.load_full()
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }

    /// Ports with at least one rule, mapped to whether they speak TLS.
    pub fn ports(&self) -> BTreeMap<u16, bool> {
        self.rules
            .load()
            .iter()
            .map(|r| (r.port(), r.is_tls()))
            .collect()
    }

    pub fn route(&self, port: u16, target: &RequestTarget<'_>) -> RouteDecision {
        let rules = self.rules.load();
        let hosted: Vec<&Arc<AcceptRule>> = rules
            .iter()
            .filter(|r| r.port() == port && r.check_host(target.host))
            .collect();
        if hosted.is_empty() {
            return RouteDecision::UnknownHost;
        }

        let pathed: Vec<&Arc<AcceptRule>> = hosted
            .into_iter()
            .filter(|r| r.check_path(target.path))
            .collect();
        if pathed.is_empty() {
            return RouteDecision::NotFound;
        }

        match pathed.iter().find(|r| r.check_method(target.method)) {
            Some(rule) => RouteDecision::Accept(Arc::clone(rule)),
            None => {
                let mut allow: Vec<String> = Vec::new();
                for method in pathed.iter().filter_map(|r| r.method()) {
                    if !allow.iter().any(|m| m == method) {
                        allow.push(method.to_string());
                    }
                }
                RouteDecision::MethodNotAllowed(allow)
            }
        }
    }
}

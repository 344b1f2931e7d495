//! Accept server.
//!
//! # Responsibilities
//! - Register accept rules and report each one (or its rejection)
//! - Bind one listener per accept port, TLS ports sharing one SNI config
//! - Wire up middleware (tracing, timeout, request ID, concurrency limit)
//! - Route, serialize and queue inbound requests; answer 202/404/405/503

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::task::JoinSet;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{AcceptConfig, LaterConfig};
use crate::events::{EventBus, LaterEvent};
use crate::http::request::{request_host, serialize_request};
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::net::listener::{ListenerError, PortListener};
use crate::net::tls::{self, CertificateMaterial, TlsError};
use crate::observability::metrics;
use crate::relay::Security;
use crate::routing::{AcceptRule, RequestTarget, RouteDecision, RuleSpec, RuleSet};
use crate::storage::Storage;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Per-port handler state.
#[derive(Clone)]
struct PortState {
    port: u16,
    encrypted: bool,
    rules: Arc<RuleSet>,
    storage: Arc<dyn Storage>,
    events: EventBus,
    max_body_size: usize,
}

/// Accepts requests for later delivery.
pub struct LaterServer {
    config: LaterConfig,
    rules: Arc<RuleSet>,
    storage: Arc<dyn Storage>,
    events: EventBus,
}

impl LaterServer {
    pub fn new(config: LaterConfig, storage: Arc<dyn Storage>, events: EventBus) -> Self {
        Self {
            config,
            rules: Arc::new(RuleSet::new()),
            storage,
            events,
        }
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register every rule a `RuleSpec` expands to.
    ///
    /// Rejected rules are reported as error events and skipped; the
    /// registered ones are returned.
    pub fn accept(&self, spec: &RuleSpec) -> Vec<Arc<AcceptRule>> {
        let mut registered = Vec::new();
        for rule in spec.expand() {
            match self.rules.register(rule) {
                Ok(rule) => {
                    self.events.emit(LaterEvent::Accepting {
                        rule: rule.canonical(),
                        forward: rule.forward().map(str::to_string),
                    });
                    registered.push(rule);
                }
                Err(e) => self.events.emit(LaterEvent::error("accept rule", e)),
            }
        }
        registered
    }

    /// Load certificates for a configured rule, then register it.
    pub async fn accept_config(&self, accept: &AcceptConfig) -> Result<Vec<Arc<AcceptRule>>, TlsError> {
        let material = match &accept.tls {
            Some(files) => match CertificateMaterial::load_with_chain(
                Path::new(&files.cert_path),
                Path::new(&files.key_path),
                &files.ca_paths.iter().map(PathBuf::from).collect::<Vec<_>>(),
            )
            .await
            {
                Ok(material) => Some(material),
                Err(e) => {
                    self.events.emit(LaterEvent::error("accept rule", &e));
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(self.accept(&RuleSpec::from_config(accept, material)))
    }

    /// Axum router answering requests arriving on `port`.
    pub fn router(&self, port: u16, encrypted: bool) -> Router {
        let state = PortState {
            port,
            encrypted,
            rules: self.rules.clone(),
            storage: self.storage.clone(),
            events: self.events.clone(),
            max_body_size: self.config.security.max_body_size,
        };
        build_router(&self.config, state)
    }

    /// Bind a listener for every port that has rules.
    pub async fn bind(&self) -> Result<BoundServer, ServerError> {
        let ip: IpAddr = self
            .config
            .listener
            .bind_address
            .parse()
            .map_err(|_| ServerError::BindAddress(self.config.listener.bind_address.clone()))?;

        let ports = self.rules.ports();
        if ports.is_empty() {
            tracing::warn!("No accept rules registered; nothing to listen on");
        }

        let tls_config = if ports.values().any(|tls| *tls) {
            Some(tls::server_config(self.rules.clone())?)
        } else {
            None
        };

        let mut listeners = Vec::with_capacity(ports.len());
        for (port, encrypted) in ports {
            let config = if encrypted { tls_config.clone() } else { None };
            let listener = PortListener::bind(ip, port, config).await?;
            self.events.emit(LaterEvent::Listening {
                addr: listener.local_addr(),
                tls: encrypted,
            });
            listeners.push((listener, self.router(port, encrypted)));
        }

        Ok(BoundServer { listeners })
    }

    /// Bind and serve until shutdown.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        self.bind().await?.serve(shutdown).await
    }
}

/// Listeners ready to serve.
pub struct BoundServer {
    listeners: Vec<(PortListener, Router)>,
}

impl BoundServer {
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|(l, _)| l.local_addr()).collect()
    }

    /// Serve every port until shutdown; the first listener failure is returned.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let mut tasks = JoinSet::new();
        for (listener, router) in self.listeners {
            tasks.spawn(listener.serve(router, shutdown.subscribe()));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Listener stopped");
                    first_error.get_or_insert(ServerError::from(e));
                }
                Err(e) => tracing::error!(error = %e, "Listener task failed"),
            }
        }

        tracing::info!("Accept server stopped");
        first_error.map_or(Ok(()), Err)
    }
}

#[allow(deprecated)]
fn build_router(config: &LaterConfig, state: PortState) -> Router {
    Router::new()
        .route("/{*path}", any(accept_handler))
        .route("/", any(accept_handler))
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

/// Route an inbound request and queue it if a rule accepts it.
async fn accept_handler(State(state): State<PortState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let host = request_host(&parts).unwrap_or_default();
    let summary = format!("{} {}{}", parts.method, host, parts.uri.path());

    let target = RequestTarget::new(&host, parts.uri.path(), parts.method.as_str());
    let response = match state.rules.route(state.port, &target) {
        RouteDecision::UnknownHost => response::unknown_host(),
        RouteDecision::NotFound => response::not_found(),
        RouteDecision::MethodNotAllowed(allowed) => response::method_not_allowed(&allowed),
        RouteDecision::Accept(rule) => match axum::body::to_bytes(body, state.max_body_size).await {
            Err(_) => response::payload_too_large(),
            Ok(bytes) => {
                let serialized = serialize_request(&parts, bytes, &rule, state.encrypted);
                let security = serialized.meta().security.unwrap_or(Security::Secure);
                match state.storage.queue(&serialized).await {
                    Ok(key) => {
                        tracing::debug!(key = %key, request = %serialized.describe(), "Queued");
                        response::accepted(&key, security)
                    }
                    Err(e) => {
                        metrics::record_queue_error("queue");
                        state.events.emit(LaterEvent::error("storage queue", &e));
                        response::storage_failure()
                    }
                }
            }
        },
    };

    let status = response.status().as_u16();
    metrics::record_request(status);
    state.events.emit(LaterEvent::Request { status, summary });
    response
}

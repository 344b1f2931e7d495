//! Per-port listeners.
//!
//! # Responsibilities
//! - Bind one TCP listener per accept port
//! - Wrap TLS ports in a rustls acceptor with SNI certificate selection
//! - Serve the accept router until shutdown

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
    /// Listener failed while serving.
    Serve(u16, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ListenerError::Serve(port, e) => write!(f, "Listener on port {} failed: {}", port, e),
        }
    }
}

impl std::error::Error for ListenerError {}

enum Transport {
    Plain(TcpListener),
    Tls(std::net::TcpListener, Arc<ServerConfig>),
}

/// A bound listener for one accept port.
pub struct PortListener {
    port: u16,
    local_addr: SocketAddr,
    transport: Transport,
}

impl PortListener {
    /// Bind `ip:port`, optionally speaking TLS with the given config.
    pub async fn bind(ip: IpAddr, port: u16, tls: Option<Arc<ServerConfig>>) -> Result<Self, ListenerError> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ListenerError::Bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| ListenerError::Bind(addr, e))?;

        let transport = match tls {
            None => Transport::Plain(listener),
            Some(config) => {
                let std_listener = listener.into_std().map_err(|e| ListenerError::Bind(addr, e))?;
                Transport::Tls(std_listener, config)
            }
        };

        tracing::info!(address = %local_addr, tls = matches!(transport, Transport::Tls(..)), "Listener bound");

        Ok(Self {
            port,
            local_addr,
            transport,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `app` until a shutdown signal is received.
    pub async fn serve(self, app: Router, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let port = self.port;
        match self.transport {
            Transport::Plain(listener) => {
                axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await
                    .map_err(|e| ListenerError::Serve(port, e))
            }
            Transport::Tls(listener, config) => {
                let handle = axum_server::Handle::new();
                let watcher = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    watcher.graceful_shutdown(Some(Duration::from_secs(10)));
                });

                axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(config))
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                    .map_err(|e| ListenerError::Serve(port, e))
            }
        }
    }
}

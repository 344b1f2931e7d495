//! Startup orchestration.
//!
//! # Responsibilities
//! - Open storage and register accept rules from configuration
//! - Start the replay engine when enabled
//! - Bind listeners and serve until shutdown
//!
//! # Design Decisions
//! - Listeners start last (traffic only when ready)
//! - The replay loop finishes in-flight deliveries before `start` returns

use std::sync::Arc;

use crate::config::LaterConfig;
use crate::events::EventBus;
use crate::http::{LaterServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::replay::{HttpSender, ReplayEngine};
use crate::storage::{open_storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Run the relay until `shutdown` is triggered.
pub async fn start(config: LaterConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let events = EventBus::default();
    let logger = logging::spawn_event_logger(&events);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let storage = open_storage(&config.storage).await?;
    tracing::info!(driver = ?config.storage.driver, keybase = %config.storage.keybase, "Storage ready");

    let server = LaterServer::new(config.clone(), storage.clone(), events.clone());
    for accept in &config.accept {
        // failures are reported on the event bus
        let _ = server.accept_config(accept).await;
    }

    let replay = if config.replay.enabled {
        let sender = Arc::new(HttpSender::new(&config.timeouts)?);
        let engine = ReplayEngine::new(storage, sender, &config.replay, events.clone());
        Some(tokio::spawn(engine.run(shutdown.subscribe())))
    } else {
        None
    };

    let served = match server.bind().await {
        Ok(bound) => {
            tracing::info!(addresses = ?bound.local_addrs(), "Accept server ready");
            bound.serve(shutdown).await
        }
        Err(e) => Err(e),
    };
    if served.is_err() {
        shutdown.trigger();
    }

    if let Some(replay) = replay {
        if let Err(e) = replay.await {
            tracing::error!(error = %e, "Replay task failed");
        }
    }

    drop(server);
    drop(events);
    let _ = logger.await;

    served.map_err(StartupError::from)
}

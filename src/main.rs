//! http-later
//!
//! Store-and-forward HTTP relay.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                  HTTP LATER                   │
//!                      │                                               │
//!   Client Request     │  ┌──────────┐   ┌─────────┐   ┌───────────┐   │
//!   ───────────────────┼─▶│   net    │──▶│  http   │──▶│  routing  │   │
//!   ◀── 202 + key ─────┼──│ listener │   │ server  │   │ RuleSet   │   │
//!                      │  └──────────┘   └────┬────┘   └───────────┘   │
//!                      │                      ▼                        │
//!                      │                ┌───────────┐                  │
//!                      │                │  storage  │ (redis / memory) │
//!                      │                └─────┬─────┘                  │
//!                      │                      ▼                        │
//!                      │  ┌──────────┐   ┌───────────┐                 │
//!                      │  │resilience│◀─▶│  replay   │─────────────────┼──▶ Origin
//!                      │  │ backoff  │   │  engine   │                 │
//!                      │  └──────────┘   └───────────┘                 │
//!                      │                                               │
//!                      │  events → observability (logs, metrics)       │
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use http_later::config::loader::{accept_from_options, load_config, storage_from_options, ConfigError};
use http_later::config::validation::validate_config;
use http_later::config::LaterConfig;
use http_later::lifecycle::{signals, start, Shutdown};
use http_later::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "http-later")]
#[command(version, about = "Accept HTTP requests now and deliver them later", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Accept rule, e.g. host:api.example.com,port:8080,path:/hooks,tls:cert.pem:key.pem
    #[arg(short = 'A', long = "accept", value_name = "OPTS")]
    accept: Vec<String>,

    /// Storage options, e.g. driver:redis,url:redis://127.0.0.1/,keybase:later:
    #[arg(short = 'S', long = "storage", value_name = "OPTS")]
    storage: Option<String>,

    /// Replay queued requests
    #[arg(short, long)]
    replay: bool,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log errors only
    #[arg(short, long, visible_alias = "silent")]
    quiet: bool,
}

/// File configuration with command line options layered on top.
fn build_config(cli: &Cli) -> Result<LaterConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LaterConfig::default(),
    };

    for opts in &cli.accept {
        config.accept.push(accept_from_options(opts)?);
    }
    if let Some(opts) = &cli.storage {
        config.storage = storage_from_options(opts, config.storage.clone())?;
    }
    if cli.replay {
        config.replay.enabled = true;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    logging::init(&config.observability.log_level, cli.verbose, cli.quiet)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        accept_rules = config.accept.len(),
        replay = config.replay.enabled,
        "http-later starting"
    );

    let shutdown = Shutdown::new();
    let run = start(config, &shutdown);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = signals::wait_for_signal() => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
            run.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

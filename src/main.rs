//! Hook Proxy
//!
//! A Docker API proxy that lets plugins rewrite requests before the daemon
//! sees them.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                      HOOK PROXY                      │
//!                  │                                                      │
//!  Docker client   │  ┌──────────┐   ┌──────────┐   ┌─────────────────┐   │
//!  ───────────────►├─►│   net    │──►│   http   │──►│  proxy::tree    │   │
//!                  │  │ listener │   │  server  │   │ (path segments) │   │
//!                  │  └──────────┘   └──────────┘   └────────┬────────┘   │
//!                  │                                         ▼            │
//!                  │  ┌──────────────┐             ┌─────────────────┐    │    ┌─────────┐
//!                  │  │   routing    │◄────────────│ proxy::handler  │────┼───►│ plugins │
//!                  │  │ (endpoints)  │             │ (pre-hook chain)│    │    └─────────┘
//!                  │  └──────────────┘             └────────┬────────┘    │
//!                  │                                         ▼            │
//!  ◄───────────────┤◄──────────────────────────── proxy::downgrade ──────┼───► Docker daemon
//!                  │                          (HTTP relay / raw stream)   │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use hook_proxy::admin::serve_admin;
use hook_proxy::config::validation::validate_config;
use hook_proxy::config::watcher::ConfigWatcher;
use hook_proxy::config::{load_config, ConfigError, ProxyConfig};
use hook_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use hook_proxy::net::Listener;
use hook_proxy::observability::{logging, metrics};
use hook_proxy::{AppState, ProxyServer};

#[derive(Debug, Clone, Parser)]
#[command(name = "hook-proxy", version, about = "Docker API proxy with pre-hook plugins")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "HOOK_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the backend daemon address.
    #[arg(long)]
    backend: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut ProxyConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.address = backend.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    args.apply_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level);

    if args.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backend = %config.backend.address,
        endpoints = config.endpoints.len(),
        plugins = config.plugins.len(),
        "hook-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let state = AppState::new(config.clone())?;

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let admin_state = state.clone();
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(addr, admin_state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    // Reloaded files get the same command-line overrides as the initial load.
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut file_updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let args = args.clone();
            tokio::spawn(async move {
                while let Some(mut update) = file_updates.recv().await {
                    args.apply_overrides(&mut update);
                    match validate_config(&update) {
                        Ok(()) => {
                            let _ = update_tx.send(update);
                        }
                        Err(errors) => tracing::error!(
                            error = %ConfigError::Validation(errors),
                            "Reloaded configuration rejected after overrides"
                        ),
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    let listener = Listener::bind(&config.listener.bind_address, config.listener.max_connections).await?;
    ProxyServer::new(state)
        .run(listener, update_rx, shutdown.subscribe())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

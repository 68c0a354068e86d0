//! backhaul: pooled reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::HttpServer ──▶ ProxyHandle ──▶ ProxyEngine
//!                                                       │
//!                                                       ▼
//!                                                  Dispatcher ──▶ TokioReactor ──▶ Backends
//!                                                       ▲              │
//!                                                       └── IoEvent ◀──┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use backhaul::config::watcher::{follow_updates, ConfigWatcher};
use backhaul::config::{load_config, ProxyConfig};
use backhaul::lifecycle::signals::trigger_on_signal;
use backhaul::observability::{logging, metrics};
use backhaul::{HttpServer, ProxyEngine, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "backhaul")]
#[command(about = "Reverse proxy with pooled keep-alive upstream connections", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra backend URI; may be repeated.
    #[arg(short, long = "backend")]
    backends: Vec<String>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    config.backends.extend(cli.backends.iter().cloned());
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }

    logging::init(
        &config.observability.log_filter,
        config.observability.json_logs,
    )?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backhaul starting");

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let shutdown = Shutdown::new();
    let (proxy, engine) = ProxyEngine::spawn(config.proxy_options()?, shutdown.subscribe());
    for uri in &config.backends {
        let id = proxy.add_backend(uri).await?;
        tracing::info!(backend = %uri, index = id.index(), "Backend registered");
    }

    // Keep the watcher alive for the lifetime of the process.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(follow_updates(proxy.clone(), updates));
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        backends = config.backends.len(),
        "Listening for connections"
    );

    tokio::spawn(trigger_on_signal(shutdown.clone()));

    let server = HttpServer::new(config.listener.clone(), proxy);
    server.run(listener, shutdown.wait()).await?;

    shutdown.trigger();
    engine.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

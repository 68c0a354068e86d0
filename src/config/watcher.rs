//! Configuration file watcher for hot reload.
//!
//! A reload only ever adds: new backends are registered (re-adding a known
//! one is a no-op) and the `[proxy]` table replaces the current options.
//! A raised pool floor tops up existing backends. Backends missing from the
//! new file stay registered.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::options::ProxyOptions;
use crate::config::schema::ProxyConfig;
use crate::error::ProxyError;
use crate::proxy::ProxyHandle;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Push a reloaded config into a running engine.
pub async fn apply_reload(proxy: &ProxyHandle, config: &ProxyConfig) -> Result<(), ProxyError> {
    let options = ProxyOptions::from_table(&config.proxy)?;
    proxy.replace_options(options)?;

    for uri in &config.backends {
        proxy.add_backend(uri).await?;
    }
    tracing::info!(backends = config.backends.len(), "Configuration reloaded");
    Ok(())
}

/// Apply every config that arrives on `updates` until the channel closes or
/// the engine stops.
pub async fn follow_updates(proxy: ProxyHandle, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
    while let Some(config) = updates.recv().await {
        match apply_reload(&proxy, &config).await {
            Ok(()) => {}
            Err(ProxyError::EngineStopped) => break,
            Err(e) => tracing::error!(error = %e, "Reloaded configuration rejected"),
        }
    }
}

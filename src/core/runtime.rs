//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: filesystem -> tablet manager -> tablet bootstraps
//! - Shutdown order: tablet manager (bootstrap pool, peers, apply
//!   executors) -> filesystem

use crate::core::config::Config;
use crate::manager::{TabletManager, TabletManagerOptions};
use crate::storage::fs::FsManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Slate runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Filesystem manager.
    fs: Option<Arc<FsManager>>,

    /// Tablet manager.
    manager: Option<TabletManager>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            fs: None,
            manager: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the filesystem manager (if started).
    pub fn fs(&self) -> Option<&Arc<FsManager>> {
        self.fs.as_ref()
    }

    /// Get the tablet manager (if started).
    pub fn manager(&self) -> Option<&TabletManager> {
        self.manager.as_ref()
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub fn start(&mut self) -> Result<()> {
        tracing::info!(
            data_dir = %self.config.server.data_dir,
            "starting slate runtime"
        );

        let fs = Arc::new(
            FsManager::open(&self.config.server.data_dir)
                .context("failed to open data directory")?,
        );
        tracing::info!(server_uuid = fs.uuid(), "filesystem opened");

        let manager = TabletManager::new(
            Arc::clone(&fs),
            TabletManagerOptions::from_config(&self.config),
        );
        manager.init().context("failed to initialize tablet manager")?;

        self.fs = Some(fs);
        self.manager = Some(manager);

        tracing::info!("slate runtime started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop();
        Ok(())
    }

    /// Stop all runtime components.
    pub fn stop(&mut self) {
        tracing::info!("stopping slate runtime");
        let _ = self.shutdown_tx.send(true);

        if let Some(manager) = self.manager.take() {
            manager.shutdown();
        }
        self.fs = None;

        tracing::info!("slate runtime stopped");
    }
}

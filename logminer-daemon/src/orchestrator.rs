//! Daemon orchestration -- store wiring, rule replay, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logminer-daemon`.
//! It validates configuration, opens the file-backed store, builds the
//! worker scheduler, replays rules at boot, and flushes every worker on
//! shutdown.
//!
//! # Startup Order
//!
//! 1. Metrics recorder (so the first worker's counters are captured)
//! 2. File store under `general.data_dir`
//! 3. Scheduler with a store-backed record sink
//! 4. Rule replay (see [`crate::bootstrap`])
//! 5. Uptime gauge updater, when metrics are enabled
//!
//! # Shutdown
//!
//! All workers are closed and their final offsets persisted. Enabled flags
//! are left untouched so the next boot resumes the same rules.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use logminer_core::config::LogminerConfig;
use logminer_core::store::{FileStore, MemoryRuleStore};
use logminer_log_mining::{FlushReport, MiningConfig, Scheduler, StoreSink};

use crate::bootstrap::{self, RestoreReport};
use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: LogminerConfig,
    /// Worker scheduler shared with the rule replay.
    scheduler: Arc<Scheduler>,
    /// Daemon start time.
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or validated,
    /// or if the store cannot be opened.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogminerConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when config has already been loaded.
    pub fn build_from_config(config: LogminerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let store = Arc::new(
            FileStore::open(&config.general.data_dir)
                .map_err(|e| anyhow::anyhow!("failed to open data store: {}", e))?,
        );
        tracing::info!(data_dir = %config.general.data_dir, "data store opened");

        let mining = MiningConfig::from_core(&config.engine);
        let sink = Arc::new(StoreSink::new(store.clone(), mining.record_db.clone()));
        let scheduler = Scheduler::new(Arc::new(MemoryRuleStore::new()), store, sink, mining)
            .map_err(|e| anyhow::anyhow!("failed to build scheduler: {}", e))?;

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            start_time: Instant::now(),
        })
    }

    /// Replay rules and start workers for every enabled rule.
    pub async fn start(&self) -> Result<RestoreReport> {
        bootstrap::restore(
            &self.scheduler,
            Path::new(&self.config.general.rules_dir),
            self.config.engine.auto_enable_rules,
        )
        .await
    }

    /// Start workers and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&self) -> Result<()> {
        let report = self.start().await?;
        tracing::info!(workers = report.started.len(), "logminer-daemon running");

        let (shutdown_tx, _) = broadcast::channel(1);
        let uptime = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, shutdown_tx.subscribe()));

        let signal = wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
        if let Some(uptime) = uptime {
            if let Err(e) = uptime.await {
                tracing::warn!(error = %e, "uptime updater panicked");
            }
        }
        let signal = signal?;
        tracing::info!(signal = signal, "shutdown signal received");

        let flushed = self.shutdown().await;
        if !flushed.is_clean() {
            return Err(anyhow::anyhow!(
                "{} file offsets could not be persisted on shutdown",
                flushed.failures
            ));
        }
        Ok(())
    }

    /// Close every worker and persist final offsets.
    pub async fn shutdown(&self) -> FlushReport {
        tracing::info!("stopping all workers");
        let report = self.scheduler.shutdown().await;
        tracing::info!(
            persisted = report.persisted,
            failures = report.failures,
            uptime_secs = self.start_time.elapsed().as_secs(),
            "all workers stopped"
        );
        report
    }

    /// The worker scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogminerConfig {
        &self.config
    }
}

/// How often the uptime gauge is refreshed.
const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically publish the daemon uptime gauge until `shutdown_rx` fires.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use logminer_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
            }
        }
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uptime_updater_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_uptime_updater(Instant::now(), shutdown_rx);
        shutdown_tx.send(()).expect("updater subscribed");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("updater exits after shutdown")
            .expect("updater did not panic");
    }

    #[tokio::test]
    async fn uptime_updater_stops_when_sender_dropped() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = spawn_uptime_updater(Instant::now(), shutdown_rx);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("updater exits once the sender is gone")
            .expect("updater did not panic");
    }
}

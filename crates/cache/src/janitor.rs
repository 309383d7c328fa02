//! Periodic sweep scheduler.

use crate::controller::CacheController;
use crate::eviction::SweepKind;
use picvault_core::config::JanitorConfig;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs the TTL, size and metadata sweeps on their own intervals.
pub struct Janitor {
    controller: CacheController,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(controller: CacheController, config: JanitorConfig) -> Self {
        Self { controller, config }
    }

    /// Start the sweep loops. They stop when `shutdown` is cancelled; a sweep
    /// already running finishes first.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut loops = JoinSet::new();
            loops.spawn(sweep_loop(
                self.controller.clone(),
                SweepKind::Ttl,
                self.config.ttl_sweep_interval(),
                shutdown.clone(),
            ));
            loops.spawn(sweep_loop(
                self.controller.clone(),
                SweepKind::Size,
                self.config.size_sweep_interval(),
                shutdown.clone(),
            ));
            if self.config.metadata_sweep_enabled {
                loops.spawn(sweep_loop(
                    self.controller.clone(),
                    SweepKind::Metadata,
                    self.config.metadata_sweep_interval(),
                    shutdown.clone(),
                ));
            } else {
                tracing::info!("Metadata sweep disabled");
            }

            while let Some(result) = loops.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Sweep loop panicked");
                }
            }
            tracing::info!("Janitor stopped");
        })
    }
}

async fn sweep_loop(
    controller: CacheController,
    kind: SweepKind,
    period: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(sweep = %kind, interval_secs = period.as_secs(), "Sweep scheduled");
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = controller.run_sweep(kind).await {
            tracing::error!(sweep = %kind, error = %e, "Sweep failed");
        }
    }
}

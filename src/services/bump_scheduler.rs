//! In-process bump scheduler
//!
//! Runs the bump engine on a fixed interval. The external trigger endpoint stays
//! available; runs from either source are serialized by the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, instrument, warn};

use crate::bump::BumpEngine;

/// Bump scheduler configuration
#[derive(Clone, Debug)]
pub struct BumpSchedulerConfig {
    /// Time between run starts
    pub interval: Duration,
}

/// Periodic bump runner
pub struct BumpScheduler {
    engine: Arc<BumpEngine>,
    config: BumpSchedulerConfig,
}

impl BumpScheduler {
    pub fn new(engine: Arc<BumpEngine>, config: BumpSchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Run until shutdown is signalled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting bump scheduler (interval: {}s)",
            self.config.interval.as_secs()
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.engine.run().await;
                    let bumped = report.results.iter().filter(|r| r.success).count();
                    match report.error {
                        Some(error) => warn!(
                            reported = report.results.len(),
                            "Scheduled bump run failed: {}", error
                        ),
                        None => info!(
                            reported = report.results.len(),
                            bumped,
                            "Scheduled bump run complete"
                        ),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Bump scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the bump scheduler
pub struct BumpSchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl BumpSchedulerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

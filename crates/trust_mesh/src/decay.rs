//! Periodic decay sweep.

use crate::bridge::TrustBridgeManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Spawn a task that sweeps bridge decay every `interval` until `shutdown`
/// flips to `true` or its sender is dropped.
///
/// The first sweep runs immediately.
pub fn spawn_decay_task(
    manager: Arc<TrustBridgeManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Decay task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sweeper = manager.clone();
                    match tokio::task::spawn_blocking(move || sweeper.decay()).await {
                        Ok(Ok(report)) => {
                            if !report.changed.is_empty() {
                                info!(
                                    evaluated = report.evaluated,
                                    changed = report.changed.len(),
                                    expired = report.expired_count(),
                                    "Decay sweep applied"
                                );
                            }
                        }
                        Ok(Err(e)) => error!(error = %e, "Decay sweep failed"),
                        Err(e) => error!(error = %e, "Decay sweep panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Decay task stopped");
    })
}

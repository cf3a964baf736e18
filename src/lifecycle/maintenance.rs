//! Periodic pruning of in-memory security state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::security::pipeline::SecurityPipeline;

/// Prune the pipeline every `interval` until `shutdown` fires.
pub fn spawn_maintenance(
    pipeline: Arc<SecurityPipeline>,
    interval: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Maintenance task starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = pipeline.prune(Instant::now());
                    tracing::debug!(
                        rate_windows = report.rate_windows,
                        trust_profiles = report.trust_profiles,
                        ddos_windows = report.ddos_windows,
                        error_entries = report.error_entries,
                        sessions = report.sessions,
                        "Pruned idle state"
                    );
                }
                _ = shutdown.wait() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

//! Periodic retention sweep.
//!
//! Runs alongside the registry actor and evicts endpoints whose
//! heartbeat has gone stale. Eviction is the registry's only autonomous
//! mutation; everything else is command-driven.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handle::RegistryHandle;

/// Spawns the background sweep task.
///
/// Every `period`, asks the registry to evict endpoints whose heartbeat
/// is older than `retention_window`. The task exits promptly when
/// `shutdown` is cancelled or the registry actor goes away.
pub fn spawn_sweep_task(
    registry: RegistryHandle,
    retention_window: Duration,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            retention_window_secs = retention_window.as_secs(),
            period_secs = period.as_secs(),
            "Sweep task starting"
        );

        let mut ticker = interval(period);
        // The first tick fires immediately; skip it so a fresh daemon
        // does not evict before anyone has had a chance to heartbeat.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Sweep task shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    if !registry.is_connected() {
                        info!("Registry actor gone, sweep task exiting");
                        break;
                    }
                    let evicted = registry.sweep(retention_window).await;
                    if evicted > 0 {
                        info!(evicted, "Sweep evicted stale endpoints");
                    } else {
                        debug!("Sweep found no stale endpoints");
                    }
                }
            }
        }
    })
}

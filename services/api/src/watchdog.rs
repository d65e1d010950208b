//! services/api/src/watchdog.rs
//!
//! Background sweep that enforces the maximum session duration and expires
//! reservations nobody started a session on.

use boothnow_core::SessionEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawns the sweep loop. It exits once `shutdown` is cancelled.
pub fn spawn_session_watchdog(
    engine: Arc<SessionEngine>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Session watchdog running every {:?}", every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session watchdog stopped.");
                    break;
                }
                _ = ticker.tick() => {
                    match engine.expire_overdue().await {
                        Ok(report) if report.sessions_expired + report.reservations_expired > 0 => {
                            info!(
                                "Watchdog expired {} sessions and {} reservations",
                                report.sessions_expired, report.reservations_expired
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("Watchdog sweep failed: {}", e),
                    }
                }
            }
        }
    })
}

//! Periodic refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SyncManager;

/// Refresh once immediately and then every `period`.
///
/// Each tick spawns its own refresh task without waiting for the previous
/// one; the manager's sequence numbers keep overlapping refreshes from
/// clobbering each other. Abort the returned handle to stop ticking
/// (refreshes already spawned run to completion).
pub fn spawn_refresh_loop(manager: Arc<SyncManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Refreshing every {}s", period.as_secs_f64());

        loop {
            ticker.tick().await;
            let manager = manager.clone();
            tokio::spawn(async move {
                let outcome = manager.refresh().await;
                tracing::debug!("Refresh finished: updated={}", outcome.is_updated());
            });
        }
    })
}

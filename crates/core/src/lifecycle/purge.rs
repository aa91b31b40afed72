use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::JobStore;

/// Periodically drop records past their retention window.
///
/// Stops when `shutdown` fires or its sender is dropped.
pub fn spawn_purge_loop(
    store: Arc<dyn JobStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Purge loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match store.purge_expired() {
                        Ok(0) => {}
                        Ok(n) => info!(purged = n, "Purged expired job records"),
                        Err(e) => warn!(error = %e, "Failed to purge expired job records"),
                    }
                }
            }
        }
    })
}

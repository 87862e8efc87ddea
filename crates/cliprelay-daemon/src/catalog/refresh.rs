//! Periodic catalog refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::selector::Catalog;

/// Re-list the catalog every `interval` until `shutdown` fires, waking the
/// dispatcher whenever clips are listed. Failures are logged and the previous
/// list stays in place.
pub fn spawn_refresh_task(
    catalog: Arc<Catalog>,
    interval: Duration,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => match catalog.refresh().await {
                    Ok(clips) => {
                        debug!(clips, "Scheduled catalog refresh");
                        if clips > 0 {
                            wake.notify_one();
                        }
                    }
                    Err(e) => warn!(error = %e, "Scheduled catalog refresh failed"),
                },
                () = shutdown.cancelled() => {
                    info!("Catalog refresh task shutting down");
                    return;
                }
            }
        }
    })
}

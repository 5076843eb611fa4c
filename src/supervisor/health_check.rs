//! Periodic liveness sweep.
//!
//! Runs [`ProcessTracker::check_all`] on a fixed interval until the
//! cancellation token fires. Cancelling is idempotent, and a detached task
//! never keeps the runtime alive on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::process_tracker::ProcessTracker;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn a background task that sweeps `tracker` every `interval`.
///
/// The first sweep happens one full `interval` after spawning, so callers
/// must finish startup recovery before calling this.
#[must_use]
pub fn spawn_health_check(
    tracker: Arc<ProcessTracker>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("health check shutting down");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {}
                }

                let report = tracker.check_all().await;
                if report.dead.is_empty() {
                    debug!(alive = report.alive.len(), "sweep complete");
                } else {
                    info!(
                        alive = report.alive.len(),
                        dead = ?report.dead,
                        "sweep reaped dead session processes"
                    );
                }
            }
        }
        .instrument(info_span!("health_check")),
    )
}

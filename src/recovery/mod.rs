//! Periodic self-correction: stuck deployments and expired environment locks.

mod locks;
mod stuck;

pub use locks::{LockExpiry, LockThreshold};
pub use stuck::{StuckDeploymentSweeper, SweepReport};

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How long an in-flight deployment may go without an update.
pub const STUCK_DEPLOYMENT_TIMEOUT: chrono::Duration = chrono::Duration::hours(1);
pub const STUCK_SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);
pub const LOCK_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Calls `tick` every `period` until cancelled. Cancellation is observed
/// between ticks; a running tick is never interrupted.
pub async fn run_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    immediate: bool,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(task, period_secs = period.as_secs(), "Periodic task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => tick().await,
        }
    }

    info!(task, "Periodic task stopped");
}

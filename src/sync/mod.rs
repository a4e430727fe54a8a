//! Pull-side reconciliation against the platform's REST API.

mod orchestrator;
mod tracker;

pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncStep};
pub use tracker::SyncTracker;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::recovery::run_periodic;

/// Resyncs every configured repository on the configured interval. Returns
/// immediately when the interval is zero or no repository is listed.
pub async fn run_scheduled(
    orchestrator: Arc<SyncOrchestrator>,
    config: SyncConfig,
    cancel: CancellationToken,
) {
    if config.interval_minutes == 0 || config.repositories.is_empty() {
        info!("Scheduled sync disabled");
        return;
    }

    let period = Duration::from_secs(u64::from(config.interval_minutes) * 60);
    let repositories = Arc::new(config.repositories);

    run_periodic("scheduled_sync", period, config.run_on_startup, cancel.clone(), || {
        let orchestrator = orchestrator.clone();
        let repositories = repositories.clone();
        let cancel = cancel.clone();
        async move {
            for full_name in repositories.iter() {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = orchestrator.sync_repository(full_name).await {
                    error!(repository = %full_name, "Scheduled sync failed: {e}");
                }
            }
        }
    })
    .await;
}

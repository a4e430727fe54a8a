use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::store::Store;
use crate::types::{SyncRun, SyncRunStatus};

/// Cooldown gate and cutoff bookkeeping for sync runs.
#[derive(Clone)]
pub struct SyncTracker {
    store: Arc<dyn Store>,
    cooldown: Duration,
    timeframe: Duration,
}

impl SyncTracker {
    pub fn new(store: Arc<dyn Store>, cooldown: Duration, timeframe: Duration) -> Self {
        Self {
            store,
            cooldown,
            timeframe,
        }
    }

    /// Opens an IN_PROGRESS run, or returns None while the previous one is
    /// inside the cooldown window.
    pub fn begin(&self, repository: &str, now: DateTime<Utc>) -> Result<Option<SyncRun>> {
        self.store.begin_sync_run(repository, now, self.cooldown)
    }

    /// Oldest update worth fetching for `run`. Never earlier than the start
    /// of the previous successful or still running sync.
    pub fn cutoff(&self, run: &SyncRun, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let floor = now - self.timeframe;
        Ok(match self.store.last_sync_start(&run.repository, run.id)? {
            Some(previous) => floor.max(previous),
            None => floor,
        })
    }

    pub fn finish(
        &self,
        mut run: SyncRun,
        status: SyncRunStatus,
        end_time: DateTime<Utc>,
    ) -> Result<SyncRun> {
        self.store.finish_sync_run(run.id, status, end_time)?;
        run.status = status;
        run.end_time = Some(end_time);
        Ok(run)
    }
}

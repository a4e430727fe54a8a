use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::STUCK_DEPLOYMENT_TIMEOUT;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub external_failed: usize,
    pub native_failed: usize,
}

/// Forces deployments that stopped reporting progress into a terminal state.
pub struct StuckDeploymentSweeper {
    store: Arc<dyn Store>,
    timeout: chrono::Duration,
}

impl StuckDeploymentSweeper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: STUCK_DEPLOYMENT_TIMEOUT,
        }
    }

    /// Each row is failed with its own conditional update, so a row that
    /// received an update after the scan is left as is.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let threshold = now - self.timeout;
        let mut report = SweepReport::default();

        for deployment in self.store.find_stuck_external_deployments(threshold)? {
            match self
                .store
                .fail_stuck_external_deployment(deployment.id, threshold, now)
            {
                Ok(true) => {
                    warn!(
                        deployment_id = deployment.id,
                        state = %deployment.state,
                        last_update = %deployment.updated_at,
                        "Failed stuck deployment"
                    );
                    report.external_failed += 1;
                }
                Ok(false) => debug!(deployment_id = deployment.id, "Deployment moved on before sweep"),
                Err(e) => error!(deployment_id = deployment.id, "Failed to sweep deployment: {e}"),
            }
        }

        for deployment in self.store.find_stuck_native_deployments(threshold)? {
            match self
                .store
                .fail_stuck_native_deployment(deployment.id, threshold, now)
            {
                Ok(true) => {
                    warn!(
                        native_id = deployment.id,
                        status = %deployment.status,
                        last_update = %deployment.updated_at,
                        "Failed stuck native deployment"
                    );
                    report.native_failed += 1;
                }
                Ok(false) => debug!(native_id = deployment.id, "Native deployment moved on before sweep"),
                Err(e) => error!(native_id = deployment.id, "Failed to sweep native deployment: {e}"),
            }
        }

        if report == SweepReport::default() {
            debug!("No stuck deployments found");
        }
        Ok(report)
    }
}

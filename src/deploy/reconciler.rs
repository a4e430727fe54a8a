use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::view::DeploymentView;
use crate::error::Result;
use crate::platform::dto::GhDeployment;
use crate::store::Store;
use crate::types::*;

/// Deployment fields as reported by either the push or the pull path.
#[derive(Debug, Clone)]
pub struct DeploymentSource {
    pub id: i64,
    /// None when the path carries no status (REST listing, `deployment` events).
    pub state: Option<DeploymentState>,
    pub sha: String,
    pub ref_name: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentSource {
    #[must_use]
    pub fn from_platform(deployment: &GhDeployment, state: Option<DeploymentState>) -> Self {
        Self {
            id: deployment.id,
            state,
            sha: deployment.sha.clone(),
            ref_name: deployment.ref_name.clone(),
            task: deployment.task.clone(),
            created_at: deployment.created_at,
            updated_at: deployment.updated_at,
        }
    }
}

/// Idempotent writer for external deployments and the read-side merge with
/// native ones. Shared by the event handlers and the sync orchestrator.
#[derive(Clone)]
pub struct DeploymentReconciler {
    store: Arc<dyn Store>,
}

impl DeploymentReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Finds or creates the environment row by name within the repository.
    pub fn ensure_environment(
        &self,
        repository: &Repository,
        name: &str,
        external_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Environment> {
        self.store.upsert_environment(&Environment {
            id: 0,
            repository_id: repository.id,
            external_id,
            name: name.to_string(),
            locked_by: None,
            locked_at: None,
            lock_expiration_threshold: None,
            lock_reservation_threshold: None,
            updated_at: now,
        })
    }

    pub fn upsert(
        &self,
        source: &DeploymentSource,
        repository: &Repository,
        environment: &Environment,
        creator: Option<&str>,
    ) -> Result<ExternalDeployment> {
        let existing = self.store.get_external_deployment(source.id)?;

        let (state, updated_at) = match &existing {
            // A late delivery must not roll the row back.
            Some(stored) if source.updated_at < stored.updated_at => {
                debug!(
                    deployment_id = source.id,
                    "Ignoring state from an older deployment update"
                );
                (stored.state, stored.updated_at)
            }
            Some(stored) => (source.state.unwrap_or(stored.state), source.updated_at),
            None => (
                source.state.unwrap_or(DeploymentState::Unknown),
                source.updated_at,
            ),
        };

        let pull_request_id = self
            .store
            .find_open_pull_request(repository.id, &source.ref_name, &source.sha)?
            .map(|pr| pr.id)
            .or_else(|| existing.as_ref().and_then(|d| d.pull_request_id));

        let creator_login = creator
            .map(str::to_string)
            .or_else(|| existing.as_ref().and_then(|d| d.creator_login.clone()));

        let deployment = ExternalDeployment {
            id: source.id,
            repository_id: repository.id,
            environment_id: environment.id,
            state,
            sha: source.sha.clone(),
            ref_name: source.ref_name.clone(),
            task: source.task.clone(),
            pull_request_id,
            creator_login,
            created_at: source.created_at,
            updated_at,
        };
        self.store.save_external_deployment(&deployment)?;

        self.link_native(&deployment)?;
        Ok(deployment)
    }

    /// Hands a pending native deployment over to the external row that confirms it.
    /// An external row links at most one native; later updates leave it alone.
    fn link_native(&self, deployment: &ExternalDeployment) -> Result<()> {
        if let Some(linked) = self.store.find_native_by_external_id(deployment.id)? {
            debug!(
                native_id = linked.id,
                deployment_id = deployment.id,
                "Native deployment already linked"
            );
            return Ok(());
        }

        let Some(mut native) = self
            .store
            .find_latest_unlinked_native_deployment(deployment.environment_id, &deployment.ref_name)?
        else {
            return Ok(());
        };

        native.external_deployment_id = Some(deployment.id);
        if deployment.updated_at >= native.updated_at {
            native.status = NativeStatus::from_deployment_state(deployment.state);
            native.updated_at = deployment.updated_at;
        }
        self.store.save_native_deployment(&native)?;

        info!(
            native_id = native.id,
            deployment_id = deployment.id,
            status = %native.status,
            "Linked native deployment"
        );
        Ok(())
    }

    /// One view per environment for the deployments of a commit.
    pub fn latest_per_environment(
        &self,
        repository_id: i64,
        sha: &str,
    ) -> Result<Vec<DeploymentView>> {
        let mut natives: BTreeMap<i64, NativeDeployment> = BTreeMap::new();
        for native in self.store.list_native_deployments_by_sha(repository_id, sha)? {
            match natives.get(&native.environment_id) {
                Some(current) if current.updated_at > native.updated_at => {}
                _ => {
                    natives.insert(native.environment_id, native);
                }
            }
        }

        let mut externals: BTreeMap<i64, ExternalDeployment> = BTreeMap::new();
        for external in self
            .store
            .list_external_deployments_by_sha(repository_id, sha)?
        {
            match externals.get(&external.environment_id) {
                Some(current) if current.updated_at > external.updated_at => {}
                _ => {
                    externals.insert(external.environment_id, external);
                }
            }
        }

        let mut environments: Vec<i64> = natives.keys().chain(externals.keys()).copied().collect();
        environments.sort_unstable();
        environments.dedup();

        Ok(environments
            .into_iter()
            .filter_map(|env| match (natives.remove(&env), externals.remove(&env)) {
                (Some(native), Some(external)) => {
                    if external.updated_at >= native.updated_at {
                        Some(DeploymentView::External(external))
                    } else {
                        Some(DeploymentView::Native(native))
                    }
                }
                (Some(native), None) => Some(DeploymentView::Native(native)),
                (None, Some(external)) => Some(DeploymentView::External(external)),
                (None, None) => None,
            })
            .collect())
    }
}

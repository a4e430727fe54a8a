use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::tracker::SyncTracker;
use crate::config::SyncConfig;
use crate::deploy::{DeploymentReconciler, DeploymentSource};
use crate::error::{Error, Result};
use crate::platform::dto::GhDeployment;
use crate::platform::{DeploymentPages, PlatformClient};
use crate::store::Store;
use crate::types::*;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Repository,
    Labels,
    PullRequests,
    Environments,
    Deployments,
    Workflows,
    Branches,
    Commits,
    Releases,
    WorkflowRuns,
}

impl SyncStep {
    pub const ALL: [SyncStep; 10] = [
        Self::Repository,
        Self::Labels,
        Self::PullRequests,
        Self::Environments,
        Self::Deployments,
        Self::Workflows,
        Self::Branches,
        Self::Commits,
        Self::Releases,
        Self::WorkflowRuns,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Labels => "labels",
            Self::PullRequests => "pull_requests",
            Self::Environments => "environments",
            Self::Deployments => "deployments",
            Self::Workflows => "workflows",
            Self::Branches => "branches",
            Self::Commits => "commits",
            Self::Releases => "releases",
            Self::WorkflowRuns => "workflow_runs",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another run started inside the cooldown window.
    Skipped,
    Completed {
        run: SyncRun,
        failed_steps: Vec<SyncStep>,
    },
    /// The repository itself could not be fetched.
    Failed { run: SyncRun },
}

/// Pulls one repository's state from the platform into the store.
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    client: Arc<dyn PlatformClient>,
    reconciler: DeploymentReconciler,
    tracker: SyncTracker,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn Store>, client: Arc<dyn PlatformClient>, config: &SyncConfig) -> Self {
        Self {
            reconciler: DeploymentReconciler::new(store.clone()),
            tracker: SyncTracker::new(store.clone(), config.cooldown(), config.timeframe()),
            store,
            client,
        }
    }

    pub async fn sync_repository(&self, full_name: &str) -> Result<SyncOutcome> {
        self.sync_repository_at(full_name, Utc::now()).await
    }

    pub async fn sync_repository_at(
        &self,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let Some(run) = self.tracker.begin(full_name, now)? else {
            info!(repository = full_name, "Sync skipped, cooldown active");
            return Ok(SyncOutcome::Skipped);
        };

        let (repository, cutoff) = match self.prepare(&run, full_name, now).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(repository = full_name, run_id = run.id, "Sync failed: {e}");
                let run = self.tracker.finish(run, SyncRunStatus::Failed, finished_at(now))?;
                return Ok(SyncOutcome::Failed { run });
            }
        };

        info!(
            repository = full_name,
            run_id = run.id,
            cutoff = %cutoff,
            "Sync started"
        );

        let mut failed_steps = Vec::new();
        for step in SyncStep::ALL.into_iter().skip(1) {
            match self.run_step(step, &repository, cutoff, now).await {
                Ok(count) => debug!(repository = full_name, step = step.as_str(), count, "Sync step done"),
                Err(e) => {
                    warn!(repository = full_name, step = step.as_str(), "Sync step failed: {e}");
                    failed_steps.push(step);
                }
            }
        }

        let run = self.tracker.finish(run, SyncRunStatus::Success, finished_at(now))?;
        info!(
            repository = full_name,
            run_id = run.id,
            failed_steps = failed_steps.len(),
            "Sync finished"
        );
        Ok(SyncOutcome::Completed { run, failed_steps })
    }

    async fn prepare(
        &self,
        run: &SyncRun,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Repository, DateTime<Utc>)> {
        let cutoff = self.tracker.cutoff(run, now)?;
        let remote = self.client.get_repository(full_name).await?;
        let repository = self.store.upsert_repository(&remote.to_repository(now))?;
        Ok((repository, cutoff))
    }

    /// Runs one of the isolated steps and returns how many rows it wrote.
    async fn run_step(
        &self,
        step: SyncStep,
        repository: &Repository,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        match step {
            SyncStep::Repository => Ok(0),
            SyncStep::Labels => self.sync_labels(repository).await,
            SyncStep::PullRequests => self.sync_pull_requests(repository).await,
            SyncStep::Environments => self.sync_environments(repository, now).await,
            SyncStep::Deployments => self.sync_deployments(repository, cutoff).await,
            SyncStep::Workflows => self.sync_workflows(repository).await,
            SyncStep::Branches => self.sync_branches(repository).await,
            SyncStep::Commits => self.sync_commits(repository).await,
            SyncStep::Releases => self.sync_releases(repository).await,
            SyncStep::WorkflowRuns => self.sync_workflow_runs(repository, cutoff).await,
        }
    }

    async fn sync_labels(&self, repository: &Repository) -> Result<usize> {
        let labels = self.client.list_labels(&repository.full_name).await?;
        for label in &labels {
            self.store.upsert_label(&Label {
                id: label.id,
                repository_id: repository.id,
                name: label.name.clone(),
                color: label.color.clone(),
                description: label.description.clone(),
            })?;
        }
        Ok(labels.len())
    }

    async fn sync_pull_requests(&self, repository: &Repository) -> Result<usize> {
        let pulls = self
            .client
            .list_open_pull_requests(&repository.full_name)
            .await?;
        for pr in &pulls {
            self.store.upsert_pull_request(&PullRequest {
                id: pr.id,
                repository_id: repository.id,
                number: pr.number,
                title: pr.title.clone(),
                state: pr.state.clone(),
                head_ref: pr.head.ref_name.clone(),
                head_sha: pr.head.sha.clone(),
                updated_at: pr.updated_at,
            })?;
        }

        // The listing only has open pull requests; anything else we still
        // hold as open was closed or merged since the last run.
        let open_ids: Vec<i64> = pulls.iter().map(|pr| pr.id).collect();
        let closed = self
            .store
            .close_missing_pull_requests(repository.id, &open_ids)?;
        if closed > 0 {
            debug!(repository = %repository.full_name, closed, "Closed stale pull requests");
        }
        Ok(pulls.len())
    }

    async fn sync_environments(&self, repository: &Repository, now: DateTime<Utc>) -> Result<usize> {
        let environments = self.client.list_environments(&repository.full_name).await?;
        for env in &environments {
            self.reconciler
                .ensure_environment(repository, &env.name, Some(env.id), now)?;
        }
        Ok(environments.len())
    }

    /// New deployments only. The listing carries no status, so rows already
    /// stored are left to the push path.
    ///
    /// A failing environment or item is logged and skipped; the step reports
    /// the first such error once every environment has been walked.
    async fn sync_deployments(&self, repository: &Repository, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut created = 0;
        let mut first_error = None;

        for env in self.store.list_environments(repository.id)? {
            let mut pages = DeploymentPages::new(self.client.as_ref(), &repository.full_name, &env.name)
                .until(cutoff);

            loop {
                let page = match pages.next_page().await {
                    Ok(Some(page)) => page,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            repository = %repository.full_name,
                            environment = %env.name,
                            "Listing deployments failed: {e}"
                        );
                        first_error = first_error.or(Some(e));
                        break;
                    }
                };

                for deployment in page.iter().filter(|d| d.updated_at >= cutoff) {
                    match self.store_new_deployment(repository, &env, deployment) {
                        Ok(true) => created += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                repository = %repository.full_name,
                                environment = %env.name,
                                deployment_id = deployment.id,
                                "Dropping deployment: {e}"
                            );
                            first_error = first_error.or(Some(e));
                        }
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Returns false when the deployment is already stored.
    fn store_new_deployment(
        &self,
        repository: &Repository,
        environment: &Environment,
        deployment: &GhDeployment,
    ) -> Result<bool> {
        if self.store.get_external_deployment(deployment.id)?.is_some() {
            return Ok(false);
        }

        let source = DeploymentSource::from_platform(deployment, None);
        let creator = deployment.creator.as_ref().map(|u| u.login.as_str());
        self.reconciler.upsert(&source, repository, environment, creator)?;
        Ok(true)
    }

    async fn sync_workflows(&self, repository: &Repository) -> Result<usize> {
        let workflows = self.client.list_workflows(&repository.full_name).await?;
        for workflow in &workflows {
            self.store.upsert_workflow(&Workflow {
                id: workflow.id,
                repository_id: repository.id,
                name: workflow.name.clone(),
                path: workflow.path.clone(),
                state: workflow.state.clone(),
            })?;
        }
        Ok(workflows.len())
    }

    async fn sync_branches(&self, repository: &Repository) -> Result<usize> {
        let branches = self.client.list_branches(&repository.full_name).await?;
        for branch in &branches {
            self.store.upsert_branch(&Branch {
                repository_id: repository.id,
                name: branch.name.clone(),
                head_sha: branch.commit.sha.clone(),
                protected: branch.protected,
            })?;
        }
        Ok(branches.len())
    }

    /// Head commit of every known branch.
    async fn sync_commits(&self, repository: &Repository) -> Result<usize> {
        let mut count = 0;

        for branch in self.store.list_branches(repository.id)? {
            let commit = match self
                .client
                .get_commit(&repository.full_name, &branch.head_sha)
                .await
            {
                Ok(commit) => commit,
                Err(Error::NotFound) => {
                    debug!(branch = %branch.name, sha = %branch.head_sha, "Head commit not found");
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.store.upsert_commit(&Commit {
                repository_id: repository.id,
                sha: commit.sha.clone(),
                message: commit.commit.message.clone(),
                author_login: commit.author.as_ref().map(|u| u.login.clone()),
                authored_at: commit.commit.author.as_ref().and_then(|a| a.date),
            })?;
            count += 1;
        }

        Ok(count)
    }

    async fn sync_releases(&self, repository: &Repository) -> Result<usize> {
        let releases = self.client.list_releases(&repository.full_name).await?;
        for release in &releases {
            self.store.upsert_release(&Release {
                id: release.id,
                repository_id: repository.id,
                tag_name: release.tag_name.clone(),
                name: release.name.clone(),
                draft: release.draft,
                prerelease: release.prerelease,
                published_at: release.published_at,
            })?;
        }
        Ok(releases.len())
    }

    async fn sync_workflow_runs(&self, repository: &Repository, cutoff: DateTime<Utc>) -> Result<usize> {
        let runs = self
            .client
            .list_workflow_runs(&repository.full_name, cutoff)
            .await?;
        for run in &runs {
            self.store
                .upsert_workflow_run(&run.to_workflow_run(repository.id))?;
        }
        Ok(runs.len())
    }
}

/// Wall clock for the end of a run, never before the run's own start.
fn finished_at(started: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(started)
}

//! Read-only access to the source platform's REST API.

mod client;
pub mod dto;

pub use client::GitHubClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use dto::*;

/// Page size for deployment listing.
pub const DEPLOYMENT_PAGE_SIZE: u32 = 100;
/// Upper bound on pages fetched per environment in one run.
pub const MAX_DEPLOYMENT_PAGES: u32 = 50;

/// Typed access to the platform. Every call may fail with a transport error,
/// which callers are expected to log and move past.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_repository(&self, full_name: &str) -> Result<GhRepository>;
    async fn list_labels(&self, full_name: &str) -> Result<Vec<GhLabel>>;
    async fn list_open_pull_requests(&self, full_name: &str) -> Result<Vec<GhPullRequest>>;
    async fn list_environments(&self, full_name: &str) -> Result<Vec<GhEnvironment>>;
    /// One page of deployments for an environment, newest first.
    async fn list_deployments(
        &self,
        full_name: &str,
        environment: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<GhDeployment>>;
    async fn list_workflows(&self, full_name: &str) -> Result<Vec<GhWorkflow>>;
    async fn list_branches(&self, full_name: &str) -> Result<Vec<GhBranch>>;
    async fn get_commit(&self, full_name: &str, sha: &str) -> Result<GhCommit>;
    async fn list_releases(&self, full_name: &str) -> Result<Vec<GhRelease>>;
    /// Runs created at or after `since`. The API cannot filter on update
    /// time, so a re-run of an older run only arrives through `workflow_run`
    /// events.
    async fn list_workflow_runs(
        &self,
        full_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GhWorkflowRun>>;
}

/// Lazily walks the deployment pages of one environment.
///
/// Ends after a short page, a not-found response or [`MAX_DEPLOYMENT_PAGES`],
/// and with [`DeploymentPages::until`] after the first page reaching past the
/// cutoff.
pub struct DeploymentPages<'a> {
    client: &'a dyn PlatformClient,
    full_name: &'a str,
    environment: &'a str,
    per_page: u32,
    page: u32,
    until: Option<DateTime<Utc>>,
    done: bool,
}

impl<'a> DeploymentPages<'a> {
    pub fn new(client: &'a dyn PlatformClient, full_name: &'a str, environment: &'a str) -> Self {
        Self::with_page_size(client, full_name, environment, DEPLOYMENT_PAGE_SIZE)
    }

    pub fn with_page_size(
        client: &'a dyn PlatformClient,
        full_name: &'a str,
        environment: &'a str,
        per_page: u32,
    ) -> Self {
        Self {
            client,
            full_name,
            environment,
            per_page: per_page.max(1),
            page: 0,
            until: None,
            done: false,
        }
    }

    /// Stops paging once a page ends with a deployment last updated before `cutoff`.
    #[must_use]
    pub fn until(mut self, cutoff: DateTime<Utc>) -> Self {
        self.until = Some(cutoff);
        self
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<GhDeployment>>> {
        if self.done || self.page >= MAX_DEPLOYMENT_PAGES {
            return Ok(None);
        }
        self.page += 1;

        let items = match self
            .client
            .list_deployments(self.full_name, self.environment, self.page, self.per_page)
            .await
        {
            Ok(items) => items,
            Err(Error::NotFound) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        if items.len() < self.per_page as usize {
            self.done = true;
        }
        if let (Some(cutoff), Some(last)) = (self.until, items.last()) {
            if last.updated_at < cutoff {
                self.done = true;
            }
        }
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items))
    }
}

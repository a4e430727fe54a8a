mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Repository operations
    /// Inserts or refreshes by external id and returns the stored row.
    fn upsert_repository(&self, repo: &Repository) -> Result<Repository>;
    fn get_repository(&self, id: i64) -> Result<Option<Repository>>;
    fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>>;
    fn get_repository_settings(&self, repository_id: i64) -> Result<Option<RepositorySettings>>;
    fn upsert_repository_settings(&self, settings: &RepositorySettings) -> Result<()>;

    // Environment operations
    /// Inserts or refreshes by (repository, name). Lock columns are never touched.
    fn upsert_environment(&self, env: &Environment) -> Result<Environment>;
    fn get_environment(&self, id: i64) -> Result<Option<Environment>>;
    fn get_environment_by_name(&self, repository_id: i64, name: &str)
    -> Result<Option<Environment>>;
    fn list_environments(&self, repository_id: i64) -> Result<Vec<Environment>>;
    fn list_locked_environments(&self) -> Result<Vec<Environment>>;
    /// Takes the lock and opens a history row in one transaction.
    /// Returns false when the environment is already locked.
    fn lock_environment(&self, id: i64, locked_by: &str, at: DateTime<Utc>) -> Result<bool>;
    /// Clears the lock and closes the open history row in one transaction.
    /// Only the lock taken by `locked_by` at `locked_at` is released; returns
    /// false when the environment is unlocked or holds a different lock.
    fn release_environment_lock(
        &self,
        id: i64,
        locked_by: &str,
        locked_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    fn list_lock_history(&self, environment_id: i64) -> Result<Vec<EnvironmentLockHistory>>;

    // External deployment operations
    fn get_external_deployment(&self, id: i64) -> Result<Option<ExternalDeployment>>;
    fn save_external_deployment(&self, deployment: &ExternalDeployment) -> Result<()>;
    fn list_external_deployments_by_sha(
        &self,
        repository_id: i64,
        sha: &str,
    ) -> Result<Vec<ExternalDeployment>>;
    fn find_stuck_external_deployments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ExternalDeployment>>;
    /// Moves the row to FAILURE if it is still in flight and not updated since
    /// `updated_before`. Returns false when a newer write got there first.
    fn fail_stuck_external_deployment(
        &self,
        id: i64,
        updated_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // Native deployment operations
    fn create_native_deployment(&self, deployment: &NativeDeployment) -> Result<i64>;
    fn get_native_deployment(&self, id: i64) -> Result<Option<NativeDeployment>>;
    fn save_native_deployment(&self, deployment: &NativeDeployment) -> Result<()>;
    fn find_native_by_external_id(&self, external_id: i64) -> Result<Option<NativeDeployment>>;
    fn find_latest_unlinked_native_deployment(
        &self,
        environment_id: i64,
        branch_name: &str,
    ) -> Result<Option<NativeDeployment>>;
    fn list_native_deployments_by_sha(
        &self,
        repository_id: i64,
        sha: &str,
    ) -> Result<Vec<NativeDeployment>>;
    fn find_stuck_native_deployments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<NativeDeployment>>;
    /// Native counterpart of [`Store::fail_stuck_external_deployment`]; linked
    /// rows are never touched.
    fn fail_stuck_native_deployment(
        &self,
        id: i64,
        updated_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // Sync run operations
    /// Checks the cooldown and inserts an IN_PROGRESS run in one transaction.
    /// Returns None when the latest run for the repository is inside the cooldown.
    fn begin_sync_run(
        &self,
        repository: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<Option<SyncRun>>;
    fn finish_sync_run(&self, id: i64, status: SyncRunStatus, end_time: DateTime<Utc>)
    -> Result<()>;
    fn latest_sync_run(&self, repository: &str) -> Result<Option<SyncRun>>;
    /// Start time of the newest SUCCESS or IN_PROGRESS run other than `exclude_id`.
    fn last_sync_start(&self, repository: &str, exclude_id: i64) -> Result<Option<DateTime<Utc>>>;

    // Pull-side mirror operations
    fn upsert_label(&self, label: &Label) -> Result<()>;
    fn upsert_pull_request(&self, pr: &PullRequest) -> Result<()>;
    /// Marks stored open pull requests absent from `open_ids` as closed.
    fn close_missing_pull_requests(&self, repository_id: i64, open_ids: &[i64]) -> Result<usize>;
    /// Newest open pull request whose head matches the branch or the sha.
    fn find_open_pull_request(
        &self,
        repository_id: i64,
        branch: &str,
        sha: &str,
    ) -> Result<Option<PullRequest>>;
    fn upsert_workflow(&self, workflow: &Workflow) -> Result<()>;
    fn upsert_branch(&self, branch: &Branch) -> Result<()>;
    fn list_branches(&self, repository_id: i64) -> Result<Vec<Branch>>;
    fn upsert_commit(&self, commit: &Commit) -> Result<()>;
    fn upsert_release(&self, release: &Release) -> Result<()>;
    fn upsert_workflow_run(&self, run: &WorkflowRun) -> Result<()>;
    fn get_workflow_run(&self, id: i64) -> Result<Option<WorkflowRun>>;
}

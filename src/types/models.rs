use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeploymentState, NativeStatus, SyncRunStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub external_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-repository knobs read by the core; edited elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub repository_id: i64,
    /// Minutes; negative disables expiration.
    pub lock_expiration_threshold: Option<i64>,
    pub lock_reservation_threshold: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub repository_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<i64>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    /// Minutes; overrides the repository default when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expiration_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_reservation_threshold: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDeployment {
    pub id: i64,
    pub repository_id: i64,
    pub environment_id: i64,
    pub state: DeploymentState,
    pub sha: String,
    pub ref_name: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_login: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeDeployment {
    pub id: i64,
    pub environment_id: i64,
    pub status: NativeStatus,
    pub sha: String,
    pub branch_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_deployment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentLockHistory {
    pub id: i64,
    pub environment_id: i64,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub repository: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SyncRunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub head_ref: String,
    pub head_sha: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub repository_id: i64,
    pub name: String,
    pub head_sha: String,
    pub protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub repository_id: i64,
    pub sha: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub repository_id: i64,
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub repository_id: i64,
    pub workflow_id: i64,
    pub name: String,
    pub head_branch: String,
    pub head_sha: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

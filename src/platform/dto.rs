//! Wire shapes of the platform's REST and webhook payloads.
//!
//! Only fields the core reads are declared; everything else is ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{Repository, WorkflowRun};

#[derive(Debug, Clone, Deserialize)]
pub struct GhUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhRepository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner: GhUser,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl GhRepository {
    /// Local row for this repository; the local id is assigned by the store.
    #[must_use]
    pub fn to_repository(&self, now: DateTime<Utc>) -> Repository {
        Repository {
            id: 0,
            external_id: self.id,
            owner: self.owner.login.clone(),
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            default_branch: self.default_branch.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhLabel {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhPullRequest {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub head: GhRef,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhEnvironment {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct GhEnvironmentList {
    #[serde(default)]
    pub environments: Vec<GhEnvironment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhDeployment {
    pub id: i64,
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default = "default_task")]
    pub task: String,
    pub environment: String,
    #[serde(default)]
    pub creator: Option<GhUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_task() -> String {
    "deploy".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhDeploymentStatus {
    pub state: String,
    #[serde(default)]
    pub environment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhWorkflow {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct GhWorkflowList {
    #[serde(default)]
    pub workflows: Vec<GhWorkflow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhBranch {
    pub name: String,
    pub commit: GhCommitRef,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhGitAuthor {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCommitDetail {
    pub message: String,
    #[serde(default)]
    pub author: Option<GhGitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCommit {
    pub sha: String,
    pub commit: GhCommitDetail,
    #[serde(default)]
    pub author: Option<GhUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhRelease {
    pub id: i64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhWorkflowRun {
    pub id: i64,
    pub workflow_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    pub head_sha: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GhWorkflowRun {
    #[must_use]
    pub fn to_workflow_run(&self, repository_id: i64) -> WorkflowRun {
        WorkflowRun {
            id: self.id,
            repository_id,
            workflow_id: self.workflow_id,
            name: self.name.clone().unwrap_or_default(),
            head_branch: self.head_branch.clone().unwrap_or_default(),
            head_sha: self.head_sha.clone(),
            status: self.status.clone().unwrap_or_else(|| "unknown".to_string()),
            conclusion: self.conclusion.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GhWorkflowRunList {
    #[serde(default)]
    pub workflow_runs: Vec<GhWorkflowRun>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_defaults_task() {
        let raw = r#"{
            "id": 11, "sha": "abc", "ref": "main", "environment": "prod",
            "created_at": "2026-03-01T09:00:00Z", "updated_at": "2026-03-01T09:05:00Z"
        }"#;
        let deployment: GhDeployment = serde_json::from_str(raw).unwrap();
        assert_eq!(deployment.task, "deploy");
        assert_eq!(deployment.ref_name, "main");
        assert!(deployment.creator.is_none());
    }

    #[test]
    fn test_pull_request_head_ref() {
        let raw = r#"{
            "id": 5, "number": 3, "title": "Fix", "state": "open",
            "head": {"ref": "feature/x", "sha": "def"},
            "updated_at": "2026-03-01T09:00:00Z"
        }"#;
        let pr: GhPullRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(pr.head.ref_name, "feature/x");
    }
}

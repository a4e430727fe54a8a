#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use deckhand::error::{Error, Result};
use deckhand::platform::PlatformClient;
use deckhand::platform::dto::*;
use deckhand::store::{SqliteStore, Store};
use deckhand::types::Repository;

pub const REPO: &str = "acme/shop";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub fn open_store() -> (TempDir, Arc<dyn Store>) {
    let temp = TempDir::new().expect("create temp dir");
    let store = SqliteStore::new(temp.path().join("test.db")).expect("open store");
    store.initialize().expect("initialize schema");
    (temp, Arc::new(store))
}

/// In-memory platform that records every call.
#[derive(Default)]
pub struct FakePlatform {
    pub labels: Vec<GhLabel>,
    pub environments: Vec<GhEnvironment>,
    /// Keyed by environment name; a missing key answers 404.
    pub deployments: HashMap<String, Vec<GhDeployment>>,
    pub pull_requests: Vec<GhPullRequest>,
    pub branches: Vec<GhBranch>,
    pub releases: Vec<GhRelease>,
    pub failing: HashSet<&'static str>,
    /// Environments whose deployment listing answers 502.
    pub failing_environments: HashSet<String>,
    calls: Mutex<Vec<String>>,
    deployment_pages: Mutex<Vec<(String, u32)>>,
    workflow_run_since: Mutex<Vec<DateTime<Utc>>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            environments: vec![GhEnvironment {
                id: 7,
                name: "production".to_string(),
            }],
            deployments: HashMap::from([("production".to_string(), Vec::new())]),
            branches: vec![GhBranch {
                name: "main".to_string(),
                commit: GhCommitRef {
                    sha: "abc123".to_string(),
                },
                protected: true,
            }],
            ..Default::default()
        }
    }

    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    pub fn failing_environment(mut self, environment: &str) -> Self {
        self.failing_environments.insert(environment.to_string());
        self
    }

    pub fn with_environment(mut self, id: i64, name: &str) -> Self {
        self.environments.push(GhEnvironment {
            id,
            name: name.to_string(),
        });
        self
    }

    pub fn with_pull_request(mut self, id: i64, head_ref: &str, head_sha: &str) -> Self {
        self.pull_requests.push(GhPullRequest {
            id,
            number: id,
            title: format!("PR {id}"),
            state: "open".to_string(),
            head: GhRef {
                ref_name: head_ref.to_string(),
                sha: head_sha.to_string(),
            },
            updated_at: now(),
        });
        self
    }

    pub fn with_deployments(mut self, environment: &str, deployments: Vec<GhDeployment>) -> Self {
        self.deployments.insert(environment.to_string(), deployments);
        self
    }

    /// Method names in call order, with repeated consecutive calls collapsed.
    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.dedup();
        calls
    }

    pub fn deployment_pages(&self) -> Vec<(String, u32)> {
        self.deployment_pages.lock().unwrap().clone()
    }

    pub fn workflow_run_since(&self) -> Vec<DateTime<Utc>> {
        self.workflow_run_since.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(method.to_string());
        if self.failing.contains(method) {
            return Err(Error::Platform {
                status: 502,
                message: format!("{method} unavailable"),
            });
        }
        Ok(())
    }
}

/// Stores the repository the fake platform reports, as an earlier run would.
pub fn seed_repository(store: &Arc<dyn Store>) -> Repository {
    store
        .upsert_repository(&Repository {
            id: 0,
            external_id: 42,
            owner: "acme".to_string(),
            name: "shop".to_string(),
            full_name: REPO.to_string(),
            default_branch: None,
            created_at: now(),
            updated_at: now(),
        })
        .expect("seed repository")
}

pub fn deployment(id: i64, environment: &str, updated_at: DateTime<Utc>) -> GhDeployment {
    GhDeployment {
        id,
        sha: "abc123".to_string(),
        ref_name: "main".to_string(),
        task: "deploy".to_string(),
        environment: environment.to_string(),
        creator: Some(GhUser {
            login: "octocat".to_string(),
        }),
        created_at: updated_at,
        updated_at,
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_repository(&self, full_name: &str) -> Result<GhRepository> {
        self.record("get_repository")?;
        let (owner, name) = full_name.split_once('/').ok_or(Error::NotFound)?;
        Ok(GhRepository {
            id: 42,
            name: name.to_string(),
            full_name: full_name.to_string(),
            owner: GhUser {
                login: owner.to_string(),
            },
            default_branch: Some("main".to_string()),
        })
    }

    async fn list_labels(&self, _full_name: &str) -> Result<Vec<GhLabel>> {
        self.record("list_labels")?;
        Ok(self.labels.clone())
    }

    async fn list_open_pull_requests(&self, _full_name: &str) -> Result<Vec<GhPullRequest>> {
        self.record("list_open_pull_requests")?;
        Ok(self.pull_requests.clone())
    }

    async fn list_environments(&self, _full_name: &str) -> Result<Vec<GhEnvironment>> {
        self.record("list_environments")?;
        Ok(self.environments.clone())
    }

    async fn list_deployments(
        &self,
        _full_name: &str,
        environment: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<GhDeployment>> {
        self.record("list_deployments")?;
        self.deployment_pages
            .lock()
            .unwrap()
            .push((environment.to_string(), page));
        if self.failing_environments.contains(environment) {
            return Err(Error::Platform {
                status: 502,
                message: format!("deployments for {environment} unavailable"),
            });
        }

        let all = self.deployments.get(environment).ok_or(Error::NotFound)?;
        let start = ((page - 1) * per_page) as usize;
        Ok(all
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn list_workflows(&self, _full_name: &str) -> Result<Vec<GhWorkflow>> {
        self.record("list_workflows")?;
        Ok(vec![GhWorkflow {
            id: 3,
            name: "CI".to_string(),
            path: ".github/workflows/ci.yml".to_string(),
            state: "active".to_string(),
        }])
    }

    async fn list_branches(&self, _full_name: &str) -> Result<Vec<GhBranch>> {
        self.record("list_branches")?;
        Ok(self.branches.clone())
    }

    async fn get_commit(&self, _full_name: &str, sha: &str) -> Result<GhCommit> {
        self.record("get_commit")?;
        Ok(GhCommit {
            sha: sha.to_string(),
            commit: GhCommitDetail {
                message: "Ship it".to_string(),
                author: Some(GhGitAuthor { date: Some(now()) }),
            },
            author: Some(GhUser {
                login: "octocat".to_string(),
            }),
        })
    }

    async fn list_releases(&self, _full_name: &str) -> Result<Vec<GhRelease>> {
        self.record("list_releases")?;
        Ok(self.releases.clone())
    }

    async fn list_workflow_runs(
        &self,
        _full_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GhWorkflowRun>> {
        self.record("list_workflow_runs")?;
        self.workflow_run_since.lock().unwrap().push(since);
        Ok(Vec::new())
    }
}

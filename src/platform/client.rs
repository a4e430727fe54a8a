use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::PlatformClient;
use super::dto::*;
use crate::backoff;
use crate::config::GitHubConfig;
use crate::error::{Error, Result};

const PER_PAGE: u32 = 100;
const MAX_LIST_PAGES: u32 = 20;
const MAX_ATTEMPTS: usize = 3;

/// REST client for the GitHub API.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("deckhand"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let mut request = self.client.get(&url).query(query);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => return Self::handle_response(resp).await,
                Err(e) if attempt + 1 < MAX_ATTEMPTS && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    let delay = backoff::delay_for_attempt(attempt);
                    tracing::warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Platform request failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound);
        }
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let message = resp.text().await.unwrap_or_default();
        Err(Error::Platform {
            status: status.as_u16(),
            message,
        })
    }

    /// Follows `page` numbers until a short page, extracting items from each body.
    async fn get_all<W, T, F>(&self, path: &str, query: &[(&str, String)], extract: F) -> Result<Vec<T>>
    where
        W: DeserializeOwned,
        F: Fn(W) -> Vec<T>,
    {
        let mut items = Vec::new();

        for page in 1..=MAX_LIST_PAGES {
            let mut page_query = query.to_vec();
            page_query.push(("per_page", PER_PAGE.to_string()));
            page_query.push(("page", page.to_string()));

            let batch = extract(self.get::<W>(path, &page_query).await?);
            let short = batch.len() < PER_PAGE as usize;
            items.extend(batch);
            if short {
                break;
            }
        }

        Ok(items)
    }
}

fn identity<T>(items: Vec<T>) -> Vec<T> {
    items
}

#[async_trait]
impl PlatformClient for GitHubClient {
    async fn get_repository(&self, full_name: &str) -> Result<GhRepository> {
        self.get(&format!("/repos/{full_name}"), &[]).await
    }

    async fn list_labels(&self, full_name: &str) -> Result<Vec<GhLabel>> {
        self.get_all(&format!("/repos/{full_name}/labels"), &[], identity)
            .await
    }

    async fn list_open_pull_requests(&self, full_name: &str) -> Result<Vec<GhPullRequest>> {
        self.get_all(
            &format!("/repos/{full_name}/pulls"),
            &[("state", "open".to_string())],
            identity,
        )
        .await
    }

    async fn list_environments(&self, full_name: &str) -> Result<Vec<GhEnvironment>> {
        self.get_all(
            &format!("/repos/{full_name}/environments"),
            &[],
            |list: GhEnvironmentList| list.environments,
        )
        .await
    }

    async fn list_deployments(
        &self,
        full_name: &str,
        environment: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<GhDeployment>> {
        self.get(
            &format!("/repos/{full_name}/deployments"),
            &[
                ("environment", environment.to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn list_workflows(&self, full_name: &str) -> Result<Vec<GhWorkflow>> {
        self.get_all(
            &format!("/repos/{full_name}/actions/workflows"),
            &[],
            |list: GhWorkflowList| list.workflows,
        )
        .await
    }

    async fn list_branches(&self, full_name: &str) -> Result<Vec<GhBranch>> {
        self.get_all(&format!("/repos/{full_name}/branches"), &[], identity)
            .await
    }

    async fn get_commit(&self, full_name: &str, sha: &str) -> Result<GhCommit> {
        self.get(&format!("/repos/{full_name}/commits/{sha}"), &[])
            .await
    }

    async fn list_releases(&self, full_name: &str) -> Result<Vec<GhRelease>> {
        self.get_all(&format!("/repos/{full_name}/releases"), &[], identity)
            .await
    }

    async fn list_workflow_runs(
        &self,
        full_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GhWorkflowRun>> {
        self.get_all(
            &format!("/repos/{full_name}/actions/runs"),
            &[("created", created_since(since))],
            |list: GhWorkflowRunList| list.workflow_runs,
        )
        .await
    }
}

/// Search qualifier for runs created at or after `since`.
fn created_since(since: DateTime<Utc>) -> String {
    format!(">={}", since.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_workflow_runs_filter_on_creation_time() {
        let since = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        assert_eq!(created_since(since), ">=2026-03-03T12:00:00Z");
    }

    #[test]
    fn test_base_url_trims_slash() {
        let client = GitHubClient::new(&GitHubConfig {
            api_url: "https://ghe.example.com/api/v3/".to_string(),
            token: None,
        })
        .unwrap();
        assert_eq!(client.base_url(), "https://ghe.example.com/api/v3");
    }
}

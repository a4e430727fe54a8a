//! Ops HTTP surface, driven in-process through the router.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{FakePlatform, open_store};
use deckhand::config::SyncConfig;
use deckhand::deploy::{DeploymentReconciler, DeploymentSource};
use deckhand::server::{AppState, create_router};
use deckhand::store::Store;
use deckhand::sync::SyncOrchestrator;
use deckhand::types::DeploymentState;

struct TestApp {
    _temp: TempDir,
    store: Arc<dyn Store>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let (temp, store) = open_store();
        let platform = Arc::new(FakePlatform::new());
        let state = Arc::new(AppState {
            orchestrator: Arc::new(SyncOrchestrator::new(
                store.clone(),
                platform,
                &SyncConfig::default(),
            )),
            reconciler: DeploymentReconciler::new(store.clone()),
        });

        Self {
            _temp: temp,
            store,
            router: create_router(state),
        }
    }

    async fn request(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sync_trigger_respects_cooldown() {
    let app = TestApp::new();

    let (status, body) = app.request("POST", "/api/v1/sync/acme/shop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "completed");
    assert_eq!(body["data"]["run"]["status"], "SUCCESS");
    assert!(body["error"].is_null());

    let (status, body) = app.request("POST", "/api/v1/sync/acme/shop").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["data"]["outcome"], "skipped");
}

#[tokio::test]
async fn test_sync_trigger_rejects_bad_name() {
    let app = TestApp::new();

    let (status, body) = app.request("POST", "/api/v1/sync/ac.me/shop").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_deployments_for_unknown_repository() {
    let app = TestApp::new();

    let (status, body) = app
        .request("GET", "/api/v1/repos/acme/shop/commits/abc123/deployments")
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Repository not found");
}

#[tokio::test]
async fn test_deployments_view_for_commit() {
    let app = TestApp::new();
    app.request("POST", "/api/v1/sync/acme/shop").await;

    let repo = app.store.get_repository_by_full_name("acme/shop").unwrap().unwrap();
    let env = app
        .store
        .get_environment_by_name(repo.id, "production")
        .unwrap()
        .unwrap();
    let now = Utc::now();
    DeploymentReconciler::new(app.store.clone())
        .upsert(
            &DeploymentSource {
                id: 500,
                state: Some(DeploymentState::Success),
                sha: "abc123".to_string(),
                ref_name: "main".to_string(),
                task: "deploy".to_string(),
                created_at: now,
                updated_at: now,
            },
            &repo,
            &env,
            None,
        )
        .unwrap();

    let (status, body) = app
        .request("GET", "/api/v1/repos/acme/shop/commits/abc123/deployments")
        .await;

    assert_eq!(status, StatusCode::OK);
    let views = body["data"].as_array().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0]["kind"], "external");
    assert_eq!(views[0]["state"], "SUCCESS");
    assert_eq!(views[0]["id"], 500);
}

#[tokio::test]
async fn test_deployments_rejects_bad_sha() {
    let app = TestApp::new();

    let (status, _) = app
        .request("GET", "/api/v1/repos/acme/shop/commits/not-a-sha/deployments")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

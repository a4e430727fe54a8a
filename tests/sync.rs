//! Pull-side sync against an in-memory platform.

mod common;

use std::sync::Arc;

use chrono::Duration;

use common::{FakePlatform, REPO, deployment, now, open_store, seed_repository};
use deckhand::config::SyncConfig;
use deckhand::platform::{DeploymentPages, MAX_DEPLOYMENT_PAGES};
use deckhand::store::Store;
use deckhand::sync::{SyncOrchestrator, SyncOutcome, SyncStep};
use deckhand::types::{DeploymentState, Environment, ExternalDeployment, PullRequest, SyncRunStatus};

fn orchestrator(store: &Arc<dyn Store>, platform: &Arc<FakePlatform>) -> SyncOrchestrator {
    SyncOrchestrator::new(store.clone(), platform.clone(), &SyncConfig::default())
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let (_temp, store) = open_store();
    let platform = Arc::new(FakePlatform::new());

    let outcome = orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        SyncOutcome::Completed { ref failed_steps, .. } if failed_steps.is_empty()
    ));
    assert_eq!(
        platform.calls(),
        vec![
            "get_repository",
            "list_labels",
            "list_open_pull_requests",
            "list_environments",
            "list_deployments",
            "list_workflows",
            "list_branches",
            "get_commit",
            "list_releases",
            "list_workflow_runs",
        ]
    );

    let repo = store.get_repository_by_full_name(REPO).unwrap().unwrap();
    assert_eq!(store.list_environments(repo.id).unwrap().len(), 1);
    assert_eq!(store.list_branches(repo.id).unwrap()[0].head_sha, "abc123");

    let run = store.latest_sync_run(REPO).unwrap().unwrap();
    assert_eq!(run.status, SyncRunStatus::Success);
    assert!(run.end_time.is_some());
}

#[tokio::test]
async fn test_failing_steps_are_isolated() {
    let (_temp, store) = open_store();
    let platform = Arc::new(
        FakePlatform::new()
            .failing("list_labels")
            .failing("list_releases"),
    );

    let outcome = orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    let SyncOutcome::Completed { run, failed_steps } = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(failed_steps, vec![SyncStep::Labels, SyncStep::Releases]);
    assert_eq!(run.status, SyncRunStatus::Success);
    assert!(platform.calls().contains(&"list_workflow_runs".to_string()));

    let repo = store.get_repository_by_full_name(REPO).unwrap().unwrap();
    assert_eq!(store.list_branches(repo.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_repository_failure_fails_the_run() {
    let (_temp, store) = open_store();
    let platform = Arc::new(FakePlatform::new().failing("get_repository"));

    let outcome = orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    assert_eq!(platform.calls(), vec!["get_repository"]);
    assert_eq!(
        store.latest_sync_run(REPO).unwrap().unwrap().status,
        SyncRunStatus::Failed
    );
}

#[tokio::test]
async fn test_cooldown_skips_without_platform_calls() {
    let (_temp, store) = open_store();
    let platform = Arc::new(FakePlatform::new());
    let orchestrator = orchestrator(&store, &platform);

    orchestrator.sync_repository_at(REPO, now()).await.unwrap();
    let calls = platform.calls().len();

    let second = orchestrator
        .sync_repository_at(REPO, now() + Duration::minutes(30))
        .await
        .unwrap();

    assert!(matches!(second, SyncOutcome::Skipped));
    assert_eq!(platform.calls().len(), calls);
}

#[tokio::test]
async fn test_cutoff_advances_with_previous_run() {
    let (_temp, store) = open_store();
    let platform = Arc::new(FakePlatform::new());
    let orchestrator = orchestrator(&store, &platform);

    orchestrator.sync_repository_at(REPO, now()).await.unwrap();
    orchestrator
        .sync_repository_at(REPO, now() + Duration::hours(2))
        .await
        .unwrap();

    assert_eq!(
        platform.workflow_run_since(),
        vec![now() - Duration::days(7), now()]
    );
}

#[tokio::test]
async fn test_existing_deployments_are_left_alone() {
    let (_temp, store) = open_store();
    let repo = seed_repository(&store);
    let env = store
        .upsert_environment(&Environment {
            id: 0,
            repository_id: repo.id,
            external_id: Some(7),
            name: "production".to_string(),
            locked_by: None,
            locked_at: None,
            lock_expiration_threshold: None,
            lock_reservation_threshold: None,
            updated_at: now(),
        })
        .unwrap();
    store
        .save_external_deployment(&ExternalDeployment {
            id: 1,
            repository_id: repo.id,
            environment_id: env.id,
            state: DeploymentState::Success,
            sha: "0ld".to_string(),
            ref_name: "main".to_string(),
            task: "deploy".to_string(),
            pull_request_id: None,
            creator_login: None,
            created_at: now() - Duration::hours(3),
            updated_at: now() - Duration::hours(3),
        })
        .unwrap();

    let platform = Arc::new(FakePlatform::new().with_deployments(
        "production",
        vec![
            deployment(2, "production", now() - Duration::hours(1)),
            deployment(1, "production", now() - Duration::hours(2)),
            deployment(0, "production", now() - Duration::days(8)),
        ],
    ));

    orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    let known = store.get_external_deployment(1).unwrap().unwrap();
    assert_eq!(known.sha, "0ld");
    assert_eq!(known.state, DeploymentState::Success);

    let seeded = store.get_external_deployment(2).unwrap().unwrap();
    assert_eq!(seeded.state, DeploymentState::Unknown);
    assert_eq!(seeded.environment_id, env.id);
    assert_eq!(seeded.creator_login.as_deref(), Some("octocat"));

    assert!(store.get_external_deployment(0).unwrap().is_none());
}

#[tokio::test]
async fn test_failing_environment_does_not_skip_the_others() {
    let (_temp, store) = open_store();
    let platform = Arc::new(
        FakePlatform::new()
            .with_environment(8, "canary")
            .failing_environment("canary")
            .with_deployments("canary", Vec::new())
            .with_deployments(
                "production",
                vec![deployment(5, "production", now() - Duration::hours(1))],
            ),
    );

    let outcome = orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    let SyncOutcome::Completed { failed_steps, .. } = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(failed_steps, vec![SyncStep::Deployments]);
    assert!(store.get_external_deployment(5).unwrap().is_some());
    assert!(
        platform
            .deployment_pages()
            .contains(&("production".to_string(), 1))
    );
}

#[tokio::test]
async fn test_deployment_paging_stops_at_cutoff() {
    let (_temp, store) = open_store();
    let items = (1..=300)
        .map(|id| {
            let age = match id {
                1..=100 => Duration::hours(1),
                101..=200 => Duration::days(8),
                _ => Duration::days(9),
            };
            deployment(id, "production", now() - age)
        })
        .collect();
    let platform = Arc::new(FakePlatform::new().with_deployments("production", items));

    orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    assert_eq!(
        platform.deployment_pages(),
        vec![("production".to_string(), 1), ("production".to_string(), 2)]
    );
    assert!(store.get_external_deployment(100).unwrap().is_some());
    assert!(store.get_external_deployment(101).unwrap().is_none());
}

#[tokio::test]
async fn test_closed_pull_requests_stop_matching() {
    let (_temp, store) = open_store();
    let repo = seed_repository(&store);
    store
        .upsert_pull_request(&PullRequest {
            id: 9,
            repository_id: repo.id,
            number: 9,
            title: "Old feature".to_string(),
            state: "open".to_string(),
            head_ref: "old-feature".to_string(),
            head_sha: "0ld".to_string(),
            updated_at: now() - Duration::days(2),
        })
        .unwrap();
    let platform = Arc::new(FakePlatform::new().with_pull_request(1, "feature", "f00"));

    orchestrator(&store, &platform)
        .sync_repository_at(REPO, now())
        .await
        .unwrap();

    assert!(
        store
            .find_open_pull_request(repo.id, "old-feature", "0ld")
            .unwrap()
            .is_none()
    );
    let open = store
        .find_open_pull_request(repo.id, "feature", "f00")
        .unwrap()
        .unwrap();
    assert_eq!(open.id, 1);
}

#[tokio::test]
async fn test_run_never_ends_before_it_starts() {
    let (_temp, store) = open_store();
    let platform = Arc::new(FakePlatform::new());
    let start = now() + Duration::days(3650);

    let outcome = orchestrator(&store, &platform)
        .sync_repository_at(REPO, start)
        .await
        .unwrap();

    let SyncOutcome::Completed { run, .. } = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(run.start_time, start);
    assert!(run.end_time.unwrap() >= run.start_time);
}

#[tokio::test]
async fn test_pages_stop_after_cutoff() {
    let items = (0..250)
        .map(|i| {
            let age = if i < 150 { Duration::hours(1) } else { Duration::days(8) };
            deployment(i, "production", now() - age)
        })
        .collect();
    let platform = FakePlatform::new().with_deployments("production", items);

    let mut pages =
        DeploymentPages::new(&platform, REPO, "production").until(now() - Duration::days(7));
    let mut sizes = Vec::new();
    while let Some(page) = pages.next_page().await.unwrap() {
        sizes.push(page.len());
    }

    assert_eq!(sizes, vec![100, 100]);
}

#[tokio::test]
async fn test_pages_stop_on_short_page() {
    let items = (0..250)
        .map(|i| deployment(i, "production", now()))
        .collect();
    let platform = FakePlatform::new().with_deployments("production", items);

    let mut pages = DeploymentPages::new(&platform, REPO, "production");
    let mut sizes = Vec::new();
    while let Some(page) = pages.next_page().await.unwrap() {
        sizes.push(page.len());
    }

    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(platform.deployment_pages().len(), 3);
}

#[tokio::test]
async fn test_pages_stop_on_not_found() {
    let platform = FakePlatform::new();

    let mut pages = DeploymentPages::new(&platform, REPO, "staging");

    assert!(pages.next_page().await.unwrap().is_none());
    assert!(pages.next_page().await.unwrap().is_none());
    assert_eq!(platform.deployment_pages(), vec![("staging".to_string(), 1)]);
}

#[tokio::test]
async fn test_pages_stop_at_cap() {
    let items = (0..(MAX_DEPLOYMENT_PAGES as i64 + 5))
        .map(|i| deployment(i, "production", now()))
        .collect();
    let platform = FakePlatform::new().with_deployments("production", items);

    let mut pages = DeploymentPages::with_page_size(&platform, REPO, "production", 1);
    let mut count = 0;
    while pages.next_page().await.unwrap().is_some() {
        count += 1;
    }

    assert_eq!(count, MAX_DEPLOYMENT_PAGES);
}

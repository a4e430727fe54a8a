//! Handlers for the platform's webhook events as they arrive on the bus.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use super::reconciler::{DeploymentReconciler, DeploymentSource};
use crate::bus::{AckMode, EventHandler};
use crate::error::Result;
use crate::platform::dto::{GhDeployment, GhDeploymentStatus, GhRepository, GhWorkflowRun};
use crate::types::{DeploymentState, Repository};

#[derive(Debug, Deserialize)]
struct DeploymentStatusEvent {
    deployment_status: GhDeploymentStatus,
    deployment: GhDeployment,
    repository: GhRepository,
}

#[derive(Debug, Deserialize)]
struct DeploymentEvent {
    deployment: GhDeployment,
    repository: GhRepository,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunEvent {
    workflow_run: GhWorkflowRun,
    repository: GhRepository,
}

fn ensure_repository(reconciler: &DeploymentReconciler, repo: &GhRepository) -> Result<Repository> {
    reconciler.store().upsert_repository(&repo.to_repository(Utc::now()))
}

fn apply_deployment(
    reconciler: &DeploymentReconciler,
    repo: &GhRepository,
    deployment: &GhDeployment,
    source: &DeploymentSource,
) -> Result<()> {
    let repository = ensure_repository(reconciler, repo)?;
    let environment =
        reconciler.ensure_environment(&repository, &deployment.environment, None, Utc::now())?;
    let creator = deployment.creator.as_ref().map(|u| u.login.as_str());

    let saved = reconciler.upsert(source, &repository, &environment, creator)?;
    info!(
        repository = %repository.full_name,
        environment = %environment.name,
        deployment_id = saved.id,
        state = %saved.state,
        "Deployment updated from event"
    );
    Ok(())
}

pub struct DeploymentStatusHandler {
    reconciler: DeploymentReconciler,
}

impl DeploymentStatusHandler {
    pub fn new(reconciler: DeploymentReconciler) -> Arc<Self> {
        Arc::new(Self { reconciler })
    }
}

#[async_trait]
impl EventHandler for DeploymentStatusHandler {
    fn event_type(&self) -> &'static str {
        "deployment_status"
    }

    async fn handle(&self, _subject: &str, payload: &[u8]) -> Result<()> {
        let event: DeploymentStatusEvent = serde_json::from_slice(payload)?;

        let state = DeploymentState::from_platform_status(&event.deployment_status.state);
        let mut source = DeploymentSource::from_platform(&event.deployment, Some(state));
        // The status carries the moment of the transition.
        source.updated_at = source.updated_at.max(event.deployment_status.updated_at);

        apply_deployment(&self.reconciler, &event.repository, &event.deployment, &source)
    }
}

pub struct DeploymentHandler {
    reconciler: DeploymentReconciler,
}

impl DeploymentHandler {
    pub fn new(reconciler: DeploymentReconciler) -> Arc<Self> {
        Arc::new(Self { reconciler })
    }
}

#[async_trait]
impl EventHandler for DeploymentHandler {
    fn event_type(&self) -> &'static str {
        "deployment"
    }

    async fn handle(&self, _subject: &str, payload: &[u8]) -> Result<()> {
        let event: DeploymentEvent = serde_json::from_slice(payload)?;
        let source = DeploymentSource::from_platform(&event.deployment, None);
        apply_deployment(&self.reconciler, &event.repository, &event.deployment, &source)
    }
}

/// Best-effort; acknowledged before processing.
pub struct WorkflowRunHandler {
    reconciler: DeploymentReconciler,
}

impl WorkflowRunHandler {
    pub fn new(reconciler: DeploymentReconciler) -> Arc<Self> {
        Arc::new(Self { reconciler })
    }
}

#[async_trait]
impl EventHandler for WorkflowRunHandler {
    fn event_type(&self) -> &'static str {
        "workflow_run"
    }

    fn ack_mode(&self) -> AckMode {
        AckMode::BeforeProcessing
    }

    async fn handle(&self, _subject: &str, payload: &[u8]) -> Result<()> {
        let event: WorkflowRunEvent = serde_json::from_slice(payload)?;
        let repository = ensure_repository(&self.reconciler, &event.repository)?;

        self.reconciler
            .store()
            .upsert_workflow_run(&event.workflow_run.to_workflow_run(repository.id))?;
        debug!(
            repository = %repository.full_name,
            run_id = event.workflow_run.id,
            "Workflow run updated from event"
        );
        Ok(())
    }
}

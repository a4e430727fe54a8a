use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::error::Error;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{validate_full_name, validate_sha};
use crate::sync::SyncOutcome;

pub fn ops_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/{owner}/{name}", post(trigger_sync))
        .route(
            "/repos/{owner}/{name}/commits/{sha}/deployments",
            get(commit_deployments),
        )
}

/// Runs a sync right away, subject to the same cooldown as the scheduler.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path((owner, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let full_name = validate_full_name(&owner, &name)?;

    let outcome = match state.orchestrator.sync_repository(&full_name).await {
        Ok(outcome) => outcome,
        Err(Error::Database(e)) => {
            tracing::error!(repository = %full_name, "Sync bookkeeping failed: {e}");
            return Err(ApiError::internal("Failed to record sync run"));
        }
        Err(e) => {
            tracing::error!(repository = %full_name, "Sync failed: {e}");
            return Err(ApiError::bad_gateway("Sync failed"));
        }
    };

    let status = match &outcome {
        SyncOutcome::Skipped => StatusCode::CONFLICT,
        SyncOutcome::Completed { .. } | SyncOutcome::Failed { .. } => StatusCode::OK,
    };

    Ok::<_, ApiError>((status, Json(ApiResponse::success(outcome))))
}

/// The deployment to show per environment for one commit.
pub async fn commit_deployments(
    State(state): State<Arc<AppState>>,
    Path((owner, name, sha)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let full_name = validate_full_name(&owner, &name)?;
    validate_sha(&sha)?;

    let repository = state
        .reconciler
        .store()
        .get_repository_by_full_name(&full_name)
        .api_err("Failed to get repository")?
        .or_not_found("Repository not found")?;

    let views = state
        .reconciler
        .latest_per_environment(repository.id, &sha)
        .api_err("Failed to load deployments")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(views)))
}

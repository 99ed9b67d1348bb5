use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;

use crate::api::AppState;
use crate::workers::reconciliation::ReconciliationResult;
use crate::workers::scheduler::{JobId, SchedulerStatus};

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: JobId,
    pub paused: bool,
}

/// POST /admin/reconciliation/trigger
pub async fn trigger(State(state): State<AppState>) -> (StatusCode, Json<TriggerResponse>) {
    let job_id = state.scheduler.trigger_now().await;
    let paused = state.scheduler.is_paused().await;
    info!(job_id = %job_id, paused, "manual reconciliation requested");
    (StatusCode::ACCEPTED, Json(TriggerResponse { job_id, paused }))
}

/// GET /admin/reconciliation/status
pub async fn status(State(state): State<AppState>) -> Json<SchedulerStatus<ReconciliationResult>> {
    Json(state.scheduler.status().await)
}

/// POST /admin/reconciliation/pause
pub async fn pause(State(state): State<AppState>) -> Json<SchedulerStatus<ReconciliationResult>> {
    state.scheduler.pause().await;
    Json(state.scheduler.status().await)
}

/// POST /admin/reconciliation/resume
pub async fn resume(State(state): State<AppState>) -> Json<SchedulerStatus<ReconciliationResult>> {
    state.scheduler.resume().await;
    Json(state.scheduler.status().await)
}

//! HTTP surface over the payment service.

pub mod admin;
pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::error;

use crate::config::RedirectConfig;
use crate::health::HealthChecker;
use crate::services::payment_service::PaymentService;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::reconciliation::ReconciliationWorker;
use crate::workers::scheduler::JobScheduler;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub scheduler: JobScheduler<ReconciliationWorker>,
    pub webhooks: Arc<WebhookProcessor>,
    pub redirect: RedirectConfig,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments", post(payments::create_payment))
        .route("/payments/callback", get(payments::callback))
        .route("/payments/query/{merchant_txn_ref}", get(payments::query_by_ref))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/cancel", post(payments::cancel_payment))
        .route("/payments/{id}/refund", post(payments::refund_payment))
        .route("/admin/reconciliation/trigger", post(admin::trigger))
        .route("/admin/reconciliation/status", get(admin::status))
        .route("/admin/reconciliation/pause", post(admin::pause))
        .route("/admin/reconciliation/resume", post(admin::resume))
        .route("/webhooks/gateway", post(webhooks::handle_webhook))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health_status = state.health.check_health().await;
    if matches!(health_status.status, crate::health::HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    } else {
        (StatusCode::OK, Json(health_status))
    }
}

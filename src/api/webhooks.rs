use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::payments::webhook::SIGNATURE_HEADER;
use crate::services::webhook_processor::WebhookProcessorError;

/// POST /webhooks/gateway
///
/// Takes the raw body so the signature is checked over the exact bytes sent.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string());

    if signature.is_none() {
        warn!("Missing webhook signature");
        return (StatusCode::UNAUTHORIZED, "Missing signature").into_response();
    }

    match state.webhooks.process(signature.as_deref(), &body).await {
        Ok(ack) => {
            info!(ack = ?ack, "Webhook processed successfully");
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!("Invalid webhook signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(WebhookProcessorError::NotConfigured) => {
            error!("Webhook received but WEBHOOK_SECRET is not set");
            (StatusCode::SERVICE_UNAVAILABLE, "Webhooks not configured").into_response()
        }
        Err(WebhookProcessorError::InvalidPayload(reason)) => {
            warn!(reason = %reason, "Invalid webhook payload");
            (StatusCode::BAD_REQUEST, "Invalid payload").into_response()
        }
        // Store or lock trouble: let the sender redeliver.
        Err(WebhookProcessorError::Processing(e)) => e.into_response(),
    }
}

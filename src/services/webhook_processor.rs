use crate::error::PaymentError;
use crate::payments::webhook;
use crate::services::payment_service::{PaymentService, ReconcileOutcome};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Webhook secret not configured")]
    NotConfigured,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Processing error: {0}")]
    Processing(PaymentError),
}

/// What happened to an accepted notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookAck {
    Applied { merchant_txn_ref: String, status: String },
    Refreshed { merchant_txn_ref: String, status: String },
    Ignored { merchant_txn_ref: String, reason: String },
}

pub struct WebhookProcessor {
    payments: Arc<PaymentService>,
    secret: Option<String>,
}

impl WebhookProcessor {
    pub fn new(payments: Arc<PaymentService>, secret: Option<String>) -> Self {
        Self {
            payments,
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Verifies `body` against `signature`, then reconciles the notified
    /// order through the state machine. Notifications for unknown orders or
    /// for moves the state machine forbids are acknowledged and ignored;
    /// redelivery would not change the answer.
    pub async fn process(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookAck, WebhookProcessorError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookProcessorError::NotConfigured)?;

        if let Err(e) = webhook::verify_signature(body, secret, signature) {
            error!(error = %e, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let outcome = webhook::parse_notification(body)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;
        let merchant_txn_ref = outcome.merchant_txn_ref.clone();

        match self.payments.apply_gateway_outcome(&outcome).await {
            Ok(ReconcileOutcome::Updated(record)) => {
                info!(
                    merchant_txn_ref = %merchant_txn_ref,
                    status = %record.status,
                    "webhook applied"
                );
                Ok(WebhookAck::Applied {
                    merchant_txn_ref,
                    status: record.status.to_string(),
                })
            }
            Ok(ReconcileOutcome::Refreshed(record)) => Ok(WebhookAck::Refreshed {
                merchant_txn_ref,
                status: record.status.to_string(),
            }),
            Ok(ReconcileOutcome::Unmapped { response_code }) => Ok(WebhookAck::Ignored {
                merchant_txn_ref,
                reason: format!(
                    "result not mapped (gateway code {})",
                    response_code.as_deref().unwrap_or("<none>")
                ),
            }),
            Err(e @ PaymentError::NotFound { .. }) | Err(e @ PaymentError::IllegalTransition { .. }) => {
                warn!(merchant_txn_ref = %merchant_txn_ref, error = %e, "webhook ignored");
                Ok(WebhookAck::Ignored {
                    merchant_txn_ref,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(merchant_txn_ref = %merchant_txn_ref, error = %e, "webhook processing failed");
                Err(WebhookProcessorError::Processing(e))
            }
        }
    }
}

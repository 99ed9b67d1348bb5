//! Server-to-server notifications from the hosted-checkout variant of the
//! gateway. The signature covers the raw request body exactly as received.

use crate::database::models::TransactionStatus;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::types::GatewayOutcome;
use crate::payments::utils::verify_hmac_sha256_hex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
struct Notification {
    order: NotificationOrder,
    result: String,
    #[serde(default)]
    transaction: Option<NotificationTransaction>,
    #[serde(default)]
    response: Option<NotificationResponse>,
}

#[derive(Debug, Deserialize)]
struct NotificationOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationTransaction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    authorization_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationResponse {
    #[serde(default)]
    gateway_code: Option<String>,
    #[serde(default)]
    acquirer_message: Option<String>,
}

pub fn verify_signature(body: &[u8], secret: &str, signature: Option<&str>) -> GatewayResult<()> {
    let signature = signature
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::Integrity {
            message: format!("{} header missing", SIGNATURE_HEADER),
        })?;
    if verify_hmac_sha256_hex(body, secret, signature) {
        Ok(())
    } else {
        Err(GatewayError::Integrity {
            message: "webhook signature mismatch".to_string(),
        })
    }
}

fn map_result(result: &str) -> Option<TransactionStatus> {
    match result.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" => Some(TransactionStatus::Success),
        "FAILURE" => Some(TransactionStatus::Failed),
        _ => None,
    }
}

/// Parses a verified notification body. Results other than `SUCCESS` and
/// `FAILURE` yield an outcome with no status.
pub fn parse_notification(body: &[u8]) -> GatewayResult<GatewayOutcome> {
    let raw: JsonValue =
        serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse {
            message: format!("webhook body is not JSON: {}", e),
        })?;
    let notification: Notification =
        serde_json::from_value(raw.clone()).map_err(|e| GatewayError::InvalidResponse {
            message: format!("unexpected webhook shape: {}", e),
        })?;

    if notification.order.id.trim().is_empty() {
        return Err(GatewayError::InvalidResponse {
            message: "webhook order.id is empty".to_string(),
        });
    }

    let transaction = notification.transaction;
    let response = notification.response;
    Ok(GatewayOutcome {
        merchant_txn_ref: notification.order.id,
        status: map_result(&notification.result),
        response_code: response.as_ref().and_then(|r| r.gateway_code.clone()),
        transaction_id: transaction.as_ref().and_then(|t| t.id.clone()),
        response_message: response.and_then(|r| r.acquirer_message),
        auth_code: transaction
            .as_ref()
            .and_then(|t| t.authorization_code.clone()),
        receipt_no: transaction.and_then(|t| t.receipt),
        batch_no: None,
        raw,
    })
}

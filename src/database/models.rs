//! Payment transaction entity and its lifecycle rules.
//!
//! ```text
//! pending ──▶ success ──▶ partially_refunded ──▶ refunded
//!    │           └───────────────────────────────▲
//!    ├──▶ failed
//!    └──▶ cancelled
//! ```

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Legal forward moves of the state machine.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Success)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Success, PartiallyRefunded)
                | (Success, Refunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// Whether a gateway payment result (`success`/`failed`) may be recorded
    /// against a transaction in this state. Repeating the same terminal
    /// result is allowed so late duplicate callbacks can refresh the gateway
    /// fields.
    pub fn accepts_payment_result(&self, result: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match result {
            Success | Failed => *self == Pending || *self == result,
            _ => false,
        }
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::PartiallyRefunded
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "refunded" => Ok(TransactionStatus::Refunded),
            "partially_refunded" => Ok(TransactionStatus::PartiallyRefunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub merchant_txn_ref: String,
    pub order_info: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub status: TransactionStatus,
    pub transaction_id: Option<String>,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub auth_code: Option<String>,
    pub receipt_no: Option<String>,
    pub batch_no: Option<String>,
    pub refunded_amount: BigDecimal,
    pub vpc_data: Option<JsonValue>,
    pub gateway_response: Option<JsonValue>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn refundable_amount(&self) -> BigDecimal {
        &self.amount - &self.refunded_amount
    }
}

/// Values supplied when a transaction is first persisted.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub merchant_txn_ref: String,
    pub order_info: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
}

impl NewTransaction {
    pub fn into_record(self, now: DateTime<Utc>) -> PaymentTransaction {
        PaymentTransaction {
            id: Uuid::new_v4(),
            merchant_txn_ref: self.merchant_txn_ref,
            order_info: self.order_info,
            amount: self.amount,
            currency: self.currency,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            status: TransactionStatus::Pending,
            transaction_id: None,
            response_code: None,
            response_message: None,
            auth_code: None,
            receipt_no: None,
            batch_no: None,
            refunded_amount: BigDecimal::from(0),
            vpc_data: None,
            gateway_response: None,
            return_url: self.return_url,
            client_ip: self.client_ip,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves the column untouched; nothing here can
/// clear a value back to null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub transaction_id: Option<String>,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub auth_code: Option<String>,
    pub receipt_no: Option<String>,
    pub batch_no: Option<String>,
    pub refunded_amount: Option<BigDecimal>,
    pub vpc_data: Option<JsonValue>,
    pub gateway_response: Option<JsonValue>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TransactionPatch {
    pub fn apply_to(self, record: &mut PaymentTransaction, now: DateTime<Utc>) {
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.transaction_id {
            record.transaction_id = Some(v);
        }
        if let Some(v) = self.response_code {
            record.response_code = Some(v);
        }
        if let Some(v) = self.response_message {
            record.response_message = Some(v);
        }
        if let Some(v) = self.auth_code {
            record.auth_code = Some(v);
        }
        if let Some(v) = self.receipt_no {
            record.receipt_no = Some(v);
        }
        if let Some(v) = self.batch_no {
            record.batch_no = Some(v);
        }
        if let Some(v) = self.refunded_amount {
            record.refunded_amount = v;
        }
        if let Some(v) = self.vpc_data {
            record.vpc_data = Some(v);
        }
        if let Some(v) = self.gateway_response {
            record.gateway_response = Some(v);
        }
        if let Some(v) = self.processed_at {
            record.processed_at = Some(v);
        }
        record.updated_at = now;
    }
}

/// `<prefix><utc millis><8 hex chars>`, e.g. `TXN1718000000000a1b2c3d4`.
pub fn generate_reference(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        prefix,
        Utc::now().timestamp_millis(),
        &random[..8]
    )
}

pub fn generate_merchant_txn_ref() -> String {
    generate_reference("TXN")
}

pub fn generate_refund_ref() -> String {
    generate_reference("RFD")
}

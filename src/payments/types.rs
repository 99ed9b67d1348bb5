use crate::database::models::TransactionStatus;
use crate::payments::utils::coerce_value;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Gateway key/value parameters. Absent keys stand in for null values; a
/// `BTreeMap` keeps them in the byte order the secure hash expects.
pub type GatewayParams = BTreeMap<String, String>;

/// Insert `value` only when present.
pub fn put_opt(params: &mut GatewayParams, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        params.insert(key.to_string(), v.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayCommand {
    Pay,
    QueryDr,
    Refund,
}

impl GatewayCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayCommand::Pay => "pay",
            GatewayCommand::QueryDr => "queryDR",
            GatewayCommand::Refund => "refund",
        }
    }
}

impl std::fmt::Display for GatewayCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully signed outbound parameter set, kept verbatim for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct SignedRequest {
    pub command: GatewayCommand,
    pub params: GatewayParams,
}

impl SignedRequest {
    pub fn to_json(&self) -> JsonValue {
        params_to_json(&self.params)
    }
}

/// Parsed gateway answer. `params` holds the decoded strings exactly as
/// received so the signature can be checked against them.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub http_status: u16,
    pub params: GatewayParams,
}

impl GatewayResponse {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Values with numeric-looking strings coerced to JSON numbers. For
    /// display only; audit copies go through [`params_to_json`].
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), coerce_value(v)))
                .collect(),
        )
    }
}

/// Parameters as JSON strings, exactly as signed, so a stored copy can be
/// verified again.
pub fn params_to_json(params: &GatewayParams) -> JsonValue {
    JsonValue::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect(),
    )
}

/// Gateway result normalised to what the state machine needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayOutcome {
    pub merchant_txn_ref: String,
    pub response_code: Option<String>,
    /// `None` when the code is not one we map to a terminal state.
    pub status: Option<TransactionStatus>,
    pub transaction_id: Option<String>,
    pub response_message: Option<String>,
    pub auth_code: Option<String>,
    pub receipt_no: Option<String>,
    pub batch_no: Option<String>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone)]
pub struct RefundCommand {
    pub refund_ref: String,
    pub original_ref: String,
    pub gateway_transaction_no: String,
    pub amount: BigDecimal,
}

/// Gateway answer to a refund command.
#[derive(Debug, Clone, Serialize)]
pub struct RefundReply {
    pub approved: bool,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub transaction_id: Option<String>,
    pub raw: JsonValue,
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::config::RedirectConfig;
use crate::database::models::{PaymentTransaction, TransactionStatus};
use crate::error::PaymentError;
use crate::payments::types::{GatewayParams, GatewayResponse};
use crate::services::payment_service::{CreatePaymentRequest, CreatedPayment};

/// Amounts arrive as JSON strings or numbers; both go through the decimal
/// text form so no float rounding creeps in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    pub fn parse(&self) -> Result<BigDecimal, PaymentError> {
        let text = match self {
            AmountInput::Text(s) => s.trim().to_string(),
            AmountInput::Number(n) => n.to_string(),
        };
        BigDecimal::from_str(&text)
            .map_err(|_| PaymentError::validation(format!("invalid amount '{}'", text), "amount"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub order_info: String,
    pub amount: AmountInput,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: AmountInput,
}

/// POST /payments
pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<(StatusCode, Json<CreatedPayment>), PaymentError> {
    let request = CreatePaymentRequest {
        order_info: body.order_info,
        amount: body.amount.parse()?,
        currency: body.currency,
        customer_email: body.customer_email,
        customer_phone: body.customer_phone,
        return_url: body.return_url,
        client_ip: body.client_ip,
    };
    let created = state.payments.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /payments/callback
///
/// The browser lands here from the gateway. It always gets a redirect, never
/// an error body.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
) -> Redirect {
    match state.payments.process_callback(&params).await {
        Ok(record) => {
            info!(
                merchant_txn_ref = %record.merchant_txn_ref,
                status = %record.status,
                "callback processed"
            );
            Redirect::to(&outcome_redirect(&state.redirect, &record))
        }
        Err(e) => {
            warn!(error = %e, "callback rejected");
            Redirect::to(&state.redirect.error_url)
        }
    }
}

/// GET /payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentTransaction>, PaymentError> {
    Ok(Json(state.payments.get_transaction(id).await?))
}

/// POST /payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentTransaction>, PaymentError> {
    Ok(Json(state.payments.cancel(id).await?))
}

/// POST /payments/{id}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> Result<Json<PaymentTransaction>, PaymentError> {
    let amount = body.amount.parse()?;
    Ok(Json(state.payments.refund(id, amount).await?))
}

/// GET /payments/query/{merchant_txn_ref}
pub async fn query_by_ref(
    State(state): State<AppState>,
    Path(merchant_txn_ref): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    let response: GatewayResponse = state.payments.query_by_ref(&merchant_txn_ref).await?;
    Ok(Json(json!({
        "http_status": response.http_status,
        "params": response.to_json(),
    })))
}

/// Success page for `success`, failure page for everything else, with the
/// reference and id appended as query parameters.
pub fn outcome_redirect(redirect: &RedirectConfig, record: &PaymentTransaction) -> String {
    let base = if record.status == TransactionStatus::Success {
        &redirect.success_url
    } else {
        &redirect.failure_url
    };
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("ref", &record.merchant_txn_ref)
        .append_pair("id", &record.id.to_string())
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, query)
}

//! Payment transaction state machine.
//!
//! Every status change happens inside one store unit of work together with
//! the gateway fields that justify it. Status queries run with no unit of
//! work open. A refund holds its row for the gateway round trip, since the
//! refundable balance must not move between the check and the write.

use crate::database::models::{
    generate_merchant_txn_ref, generate_refund_ref, NewTransaction, PaymentTransaction,
    TransactionPatch, TransactionStatus,
};
use crate::database::store::{TransactionStore, UnitOfWork};
use crate::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{GatewayOutcome, GatewayParams, GatewayResponse, RefundCommand};
use crate::payments::utils::to_minor_units;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const ORDER_INFO_MAX_LEN: usize = 34;
pub const REF_MIN_LEN: usize = 5;
pub const REF_MAX_LEN: usize = 50;

/// How gateway-side refund failures are reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundFailureMode {
    /// Decline, unreachable and timeout stay separate errors.
    #[default]
    Distinguish,
    /// Every gateway-side failure becomes [`PaymentError::RefundFailed`].
    Collapse,
}

impl FromStr for RefundFailureMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "distinguish" => Ok(RefundFailureMode::Distinguish),
            "collapse" => Ok(RefundFailureMode::Collapse),
            other => Err(format!("unknown refund failure mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_info: String,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPayment {
    pub transaction: PaymentTransaction,
    pub redirect_url: String,
}

/// Result of applying a gateway outcome outside the browser callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Updated(PaymentTransaction),
    /// Mapped status already matches the record; gateway fields were
    /// refreshed the same way a repeated callback refreshes them.
    Refreshed(PaymentTransaction),
    /// The gateway code does not map to a terminal state.
    Unmapped { response_code: Option<String> },
}

pub struct PaymentService {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    refund_failure_mode: RefundFailureMode,
}

impl PaymentService {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            gateway,
            refund_failure_mode: RefundFailureMode::default(),
        }
    }

    pub fn with_refund_failure_mode(mut self, mode: RefundFailureMode) -> Self {
        self.refund_failure_mode = mode;
        self
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub async fn get_transaction(&self, id: Uuid) -> PaymentResult<PaymentTransaction> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(id))
    }

    /// Persists a `pending` transaction and its signed gateway request in one
    /// unit of work, then returns the browser redirect target.
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> PaymentResult<CreatedPayment> {
        let new = validate_create(request)?;
        let merchant_txn_ref = new.merchant_txn_ref.clone();

        let mut uow = self.store.begin().await?;
        match self.create_in(uow.as_mut(), new).await {
            Ok(created) => {
                uow.commit().await?;
                info!(
                    merchant_txn_ref = %merchant_txn_ref,
                    transaction_id = %created.transaction.id,
                    amount = %created.transaction.amount,
                    currency = %created.transaction.currency,
                    gateway = self.gateway.name(),
                    "payment created"
                );
                Ok(created)
            }
            Err(e) => {
                rollback_quietly(uow).await;
                warn!(merchant_txn_ref = %merchant_txn_ref, error = %e, "payment creation rolled back");
                Err(e)
            }
        }
    }

    async fn create_in(
        &self,
        uow: &mut dyn UnitOfWork,
        new: NewTransaction,
    ) -> PaymentResult<CreatedPayment> {
        let record = uow.create(new).await?;
        let signed = self.gateway.build_payment_request(&record)?;
        let redirect_url = self.gateway.redirect_url(&signed)?;
        let transaction = uow
            .update(
                record.id,
                TransactionPatch {
                    vpc_data: Some(signed.to_json()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(CreatedPayment {
            transaction,
            redirect_url,
        })
    }

    /// Applies a browser callback. The signature is checked before anything
    /// is read or written.
    pub async fn process_callback(&self, params: &GatewayParams) -> PaymentResult<PaymentTransaction> {
        if let Err(e) = self.gateway.verify_callback(params) {
            warn!(
                gateway = self.gateway.name(),
                error = %e,
                "callback failed integrity check"
            );
            return Err(e.into());
        }

        let outcome = self.gateway.outcome_from_params(params, None)?;
        let status = outcome.status.ok_or_else(|| {
            PaymentError::validation(
                format!(
                    "unrecognised gateway response code: {}",
                    outcome.response_code.as_deref().unwrap_or("<none>")
                ),
                "response_code",
            )
        })?;

        let mut uow = self.store.begin().await?;
        match self.apply_callback_in(uow.as_mut(), &outcome, status).await {
            Ok(record) => {
                uow.commit().await?;
                info!(
                    merchant_txn_ref = %record.merchant_txn_ref,
                    status = %record.status,
                    response_code = ?record.response_code,
                    "callback processed"
                );
                Ok(record)
            }
            Err(e) => {
                rollback_quietly(uow).await;
                Err(e)
            }
        }
    }

    async fn apply_callback_in(
        &self,
        uow: &mut dyn UnitOfWork,
        outcome: &GatewayOutcome,
        status: TransactionStatus,
    ) -> PaymentResult<PaymentTransaction> {
        let record = uow
            .find_by_ref(&outcome.merchant_txn_ref)
            .await?
            .ok_or_else(|| PaymentError::not_found(&outcome.merchant_txn_ref))?;

        if !record.status.accepts_payment_result(status) {
            return Err(PaymentError::IllegalTransition {
                from: record.status,
                to: status,
            });
        }
        if record.status == status {
            info!(
                merchant_txn_ref = %record.merchant_txn_ref,
                status = %status,
                "repeated callback, refreshing gateway fields"
            );
        }

        Ok(uow.update(record.id, outcome_patch(outcome, status)).await?)
    }

    pub async fn cancel(&self, id: Uuid) -> PaymentResult<PaymentTransaction> {
        let mut uow = self.store.begin().await?;
        match cancel_in(uow.as_mut(), id).await {
            Ok(record) => {
                uow.commit().await?;
                info!(
                    merchant_txn_ref = %record.merchant_txn_ref,
                    transaction_id = %id,
                    "payment cancelled"
                );
                Ok(record)
            }
            Err(e) => {
                rollback_quietly(uow).await;
                Err(e)
            }
        }
    }

    /// Refunds part or all of a settled payment.
    ///
    /// The row stays locked from the eligibility check until the new balance
    /// is committed, so concurrent refunds of the same payment queue behind
    /// each other and only one of them can reach the gateway for a given
    /// slice of the refundable balance.
    pub async fn refund(&self, id: Uuid, amount: BigDecimal) -> PaymentResult<PaymentTransaction> {
        validate_amount(&amount)?;

        let mut uow = self.store.begin().await?;
        let (record, refund_ref) = match self.refund_in(uow.as_mut(), id, &amount).await {
            Ok(applied) => applied,
            Err(e) => {
                rollback_quietly(uow).await;
                return Err(e);
            }
        };

        if let Err(e) = uow.commit().await {
            error!(
                merchant_txn_ref = %record.merchant_txn_ref,
                refund_ref = %refund_ref,
                amount = %amount,
                error = %e,
                "gateway accepted refund but it could not be recorded; manual follow-up required"
            );
            return Err(e.into());
        }

        info!(
            merchant_txn_ref = %record.merchant_txn_ref,
            refund_ref = %refund_ref,
            amount = %amount,
            refunded_amount = %record.refunded_amount,
            status = %record.status,
            "refund applied"
        );
        Ok(record)
    }

    async fn refund_in(
        &self,
        uow: &mut dyn UnitOfWork,
        id: Uuid,
        amount: &BigDecimal,
    ) -> PaymentResult<(PaymentTransaction, String)> {
        let current = uow
            .find_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(id))?;
        let gateway_transaction_no = check_refund_eligibility(&current, amount)?;

        let command = RefundCommand {
            refund_ref: generate_refund_ref(),
            original_ref: current.merchant_txn_ref.clone(),
            gateway_transaction_no,
            amount: amount.clone(),
        };

        let reply = match self.gateway.refund(&command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    merchant_txn_ref = %current.merchant_txn_ref,
                    refund_ref = %command.refund_ref,
                    error = %e,
                    "refund request failed"
                );
                return Err(self.refund_failure(e.into()));
            }
        };
        if !reply.approved {
            warn!(
                merchant_txn_ref = %current.merchant_txn_ref,
                refund_ref = %command.refund_ref,
                response_code = ?reply.response_code,
                "refund declined by gateway"
            );
            return Err(self.refund_failure(PaymentError::GatewayRejected {
                response_code: reply.response_code.clone(),
                message: reply
                    .response_message
                    .clone()
                    .unwrap_or_else(|| "refund declined".to_string()),
            }));
        }

        let refunded_amount = &current.refunded_amount + amount;
        let status = if refunded_amount == current.amount {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
        let record = uow
            .update(
                id,
                TransactionPatch {
                    status: Some(status),
                    refunded_amount: Some(refunded_amount),
                    processed_at: (status == TransactionStatus::Refunded).then(Utc::now),
                    ..Default::default()
                },
            )
            .await?;
        Ok((record, command.refund_ref))
    }

    fn refund_failure(&self, err: PaymentError) -> PaymentError {
        match self.refund_failure_mode {
            RefundFailureMode::Distinguish => err,
            RefundFailureMode::Collapse => PaymentError::RefundFailed {
                message: err.to_string(),
            },
        }
    }

    /// Live gateway status for a reference this system created. The answer
    /// is returned as received.
    pub async fn query_by_ref(&self, merchant_txn_ref: &str) -> PaymentResult<GatewayResponse> {
        validate_reference(merchant_txn_ref)?;

        let record = self
            .store
            .find_by_ref(merchant_txn_ref)
            .await?
            .ok_or_else(|| PaymentError::not_found(merchant_txn_ref))?;

        let response = self.gateway.query(&record.merchant_txn_ref).await?;
        Ok(response)
    }

    /// Applies a gateway outcome learned out of band (status poll or
    /// webhook). Unmapped codes are no-ops.
    pub async fn apply_gateway_outcome(
        &self,
        outcome: &GatewayOutcome,
    ) -> PaymentResult<ReconcileOutcome> {
        let status = match outcome.status {
            Some(status) => status,
            None => {
                return Ok(ReconcileOutcome::Unmapped {
                    response_code: outcome.response_code.clone(),
                })
            }
        };

        let mut uow = self.store.begin().await?;
        let result = reconcile_in(uow.as_mut(), outcome, status).await;
        match result {
            Ok(applied) => {
                uow.commit().await?;
                if let ReconcileOutcome::Updated(record) = &applied {
                    info!(
                        merchant_txn_ref = %record.merchant_txn_ref,
                        status = %record.status,
                        "transaction reconciled with gateway"
                    );
                }
                Ok(applied)
            }
            Err(e) => {
                rollback_quietly(uow).await;
                Err(e)
            }
        }
    }
}

async fn rollback_quietly(uow: Box<dyn UnitOfWork>) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "unit of work rollback failed");
    }
}

async fn cancel_in(uow: &mut dyn UnitOfWork, id: Uuid) -> PaymentResult<PaymentTransaction> {
    let record = uow
        .find_by_id(id)
        .await?
        .ok_or_else(|| PaymentError::not_found(id))?;

    if record.status != TransactionStatus::Pending {
        return Err(PaymentError::IllegalState {
            message: format!(
                "only pending transactions can be cancelled (current status: {})",
                record.status
            ),
        });
    }

    Ok(uow
        .update(
            id,
            TransactionPatch {
                status: Some(TransactionStatus::Cancelled),
                processed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?)
}

async fn reconcile_in(
    uow: &mut dyn UnitOfWork,
    outcome: &GatewayOutcome,
    status: TransactionStatus,
) -> PaymentResult<ReconcileOutcome> {
    let record = uow
        .find_by_ref(&outcome.merchant_txn_ref)
        .await?
        .ok_or_else(|| PaymentError::not_found(&outcome.merchant_txn_ref))?;

    if record.status == status {
        debug!(
            merchant_txn_ref = %record.merchant_txn_ref,
            status = %status,
            "status already current, refreshing gateway fields"
        );
        let refreshed = uow.update(record.id, outcome_patch(outcome, status)).await?;
        return Ok(ReconcileOutcome::Refreshed(refreshed));
    }
    if !record.status.can_transition_to(status) {
        return Err(PaymentError::IllegalTransition {
            from: record.status,
            to: status,
        });
    }

    let updated = uow.update(record.id, outcome_patch(outcome, status)).await?;
    Ok(ReconcileOutcome::Updated(updated))
}

fn outcome_patch(outcome: &GatewayOutcome, status: TransactionStatus) -> TransactionPatch {
    TransactionPatch {
        status: Some(status),
        transaction_id: outcome.transaction_id.clone(),
        response_code: outcome.response_code.clone(),
        response_message: outcome.response_message.clone(),
        auth_code: outcome.auth_code.clone(),
        receipt_no: outcome.receipt_no.clone(),
        batch_no: outcome.batch_no.clone(),
        gateway_response: Some(outcome.raw.clone()),
        processed_at: Some(Utc::now()),
        ..Default::default()
    }
}

/// Returns the gateway transaction number the refund must reference.
pub fn check_refund_eligibility(
    record: &PaymentTransaction,
    amount: &BigDecimal,
) -> PaymentResult<String> {
    if !record.status.is_refundable() {
        return Err(PaymentError::IllegalState {
            message: format!(
                "only successful or partially refunded transactions can be refunded (current status: {})",
                record.status
            ),
        });
    }

    let available = record.refundable_amount();
    if amount > &available {
        return Err(PaymentError::validation(
            format!(
                "refund amount {} exceeds refundable balance {}",
                amount, available
            ),
            "amount",
        ));
    }

    record
        .transaction_id
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::IllegalState {
            message: "transaction has no gateway transaction number to refund against"
                .to_string(),
        })
}

pub fn validate_amount(amount: &BigDecimal) -> PaymentResult<()> {
    if amount <= &BigDecimal::zero() {
        return Err(PaymentError::validation(
            "amount must be greater than zero",
            "amount",
        ));
    }
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > 2 {
        return Err(PaymentError::validation(
            "amount must have at most 2 decimal places",
            "amount",
        ));
    }
    if to_minor_units(amount).is_none() {
        return Err(PaymentError::validation("amount is too large", "amount"));
    }
    Ok(())
}

pub fn validate_reference(merchant_txn_ref: &str) -> PaymentResult<()> {
    let trimmed = merchant_txn_ref.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::validation(
            "reference must not be blank",
            "merchant_txn_ref",
        ));
    }
    let len = trimmed.chars().count();
    if !(REF_MIN_LEN..=REF_MAX_LEN).contains(&len) || trimmed != merchant_txn_ref {
        return Err(PaymentError::validation(
            format!(
                "reference must be {} to {} characters",
                REF_MIN_LEN, REF_MAX_LEN
            ),
            "merchant_txn_ref",
        ));
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_create(request: CreatePaymentRequest) -> PaymentResult<NewTransaction> {
    let order_info = request.order_info.trim().to_string();
    if order_info.is_empty() {
        return Err(PaymentError::validation(
            "order_info must not be blank",
            "order_info",
        ));
    }
    if order_info.chars().count() > ORDER_INFO_MAX_LEN {
        return Err(PaymentError::validation(
            format!("order_info must be at most {} characters", ORDER_INFO_MAX_LEN),
            "order_info",
        ));
    }

    validate_amount(&request.amount)?;

    let currency = request.currency.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(PaymentError::validation(
            "currency must be a 3-letter ISO code",
            "currency",
        ));
    }

    let customer_email = blank_to_none(request.customer_email);
    if let Some(email) = &customer_email {
        if !email.contains('@') {
            return Err(PaymentError::validation(
                "customer_email is not a valid address",
                "customer_email",
            ));
        }
    }

    let return_url = blank_to_none(request.return_url);
    if let Some(url) = &return_url {
        url::Url::parse(url).map_err(|e| {
            PaymentError::validation(format!("return_url is invalid: {}", e), "return_url")
        })?;
    }

    Ok(NewTransaction {
        merchant_txn_ref: generate_merchant_txn_ref(),
        order_info,
        amount: request.amount,
        currency,
        customer_email,
        customer_phone: blank_to_none(request.customer_phone),
        return_url,
        client_ip: blank_to_none(request.client_ip),
    })
}

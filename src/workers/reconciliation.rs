use crate::database::error::DatabaseError;
use crate::database::models::PaymentTransaction;
use crate::error::PaymentError;
use crate::services::payment_service::{PaymentService, ReconcileOutcome};
use crate::workers::scheduler::RecurringTask;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// A run only fails as a whole when the pending set cannot be read.
/// Per-transaction failures are reported inside [`ReconciliationResult`].
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("could not load pending transactions: {0}")]
    Store(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Pending transactions younger than this are left to the callback.
    pub stale_after: Duration,
    /// Maximum number of transactions queried per run.
    pub batch_size: i64,
    /// Pause between successive gateway queries within a run.
    pub query_delay: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            batch_size: 50,
            query_delay: Duration::from_millis(250),
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.stale_after = Duration::from_secs(
            std::env::var("RECONCILIATION_STALE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.stale_after.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg.query_delay = Duration::from_millis(
            std::env::var("RECONCILIATION_QUERY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.query_delay.as_millis() as u64),
        );
        cfg
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconciliationFailure {
    pub transaction_id: Uuid,
    pub merchant_txn_ref: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReconciliationResult {
    pub processed_count: usize,
    pub updated_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub processing_time_ms: u64,
    pub errors: Vec<ReconciliationFailure>,
}

enum Disposition {
    Updated,
    Skipped,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconciliationWorker {
    payments: Arc<PaymentService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(payments: Arc<PaymentService>, config: ReconciliationConfig) -> Self {
        Self { payments, config }
    }

    /// One pass over the stale pending set, oldest first.
    pub async fn run_once(&self) -> Result<ReconciliationResult, ReconciliationError> {
        let started = Instant::now();
        let cutoff = stale_cutoff(chrono::Utc::now(), self.config.stale_after);

        let pending = self
            .payments
            .store()
            .find_stale_pending(cutoff, self.config.batch_size)
            .await?;

        let mut result = ReconciliationResult::default();
        for (index, transaction) in pending.iter().enumerate() {
            if index > 0 && !self.config.query_delay.is_zero() {
                tokio::time::sleep(self.config.query_delay).await;
            }

            result.processed_count += 1;
            match self.reconcile_one(transaction).await {
                Ok(Disposition::Updated) => result.updated_count += 1,
                Ok(Disposition::Skipped) => result.skipped_count += 1,
                Err(e) => {
                    warn!(
                        merchant_txn_ref = %transaction.merchant_txn_ref,
                        error = %e,
                        retryable = e.is_retryable(),
                        "reconciliation failed for transaction"
                    );
                    result.error_count += 1;
                    result.errors.push(ReconciliationFailure {
                        transaction_id: transaction.id,
                        merchant_txn_ref: transaction.merchant_txn_ref.clone(),
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        result.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = result.processed_count,
            updated = result.updated_count,
            skipped = result.skipped_count,
            errors = result.error_count,
            processing_time_ms = result.processing_time_ms,
            "reconciliation run finished"
        );
        Ok(result)
    }

    async fn reconcile_one(&self, transaction: &PaymentTransaction) -> Result<Disposition, PaymentError> {
        let gateway = self.payments.gateway();
        let response = gateway.query(&transaction.merchant_txn_ref).await?;
        let outcome =
            gateway.outcome_from_params(&response.params, Some(&transaction.merchant_txn_ref))?;

        match self.payments.apply_gateway_outcome(&outcome).await {
            Ok(ReconcileOutcome::Updated(_)) => Ok(Disposition::Updated),
            Ok(ReconcileOutcome::Refreshed(_)) => Ok(Disposition::Skipped),
            Ok(ReconcileOutcome::Unmapped { response_code }) => {
                debug!(
                    merchant_txn_ref = %transaction.merchant_txn_ref,
                    response_code = ?response_code,
                    "gateway status not final yet"
                );
                Ok(Disposition::Skipped)
            }
            // Another writer settled it between selection and update.
            Err(PaymentError::IllegalTransition { from, to }) => {
                debug!(
                    merchant_txn_ref = %transaction.merchant_txn_ref,
                    from = %from,
                    to = %to,
                    "transaction moved on during reconciliation"
                );
                Ok(Disposition::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RecurringTask for ReconciliationWorker {
    type Output = ReconciliationResult;
    type Error = ReconciliationError;

    fn name(&self) -> &'static str {
        "payment-reconciliation"
    }

    async fn run(&self) -> Result<Self::Output, Self::Error> {
        self.run_once().await
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Transactions created before the returned instant are considered stale.
pub fn stale_cutoff(
    now: chrono::DateTime<chrono::Utc>,
    stale_after: Duration,
) -> chrono::DateTime<chrono::Utc> {
    let stale_after =
        chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
    now - stale_after
}

use crate::database::error::DatabaseError;
use crate::database::models::{NewTransaction, PaymentTransaction, TransactionPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, DatabaseError>;

/// Durable storage for payment transactions.
///
/// Reads here are plain snapshots. Anything that mutates a record goes
/// through a [`UnitOfWork`] so the read-modify-write is atomic.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn find_by_ref(&self, merchant_txn_ref: &str) -> StoreResult<Option<PaymentTransaction>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<PaymentTransaction>>;

    /// `pending` records created before `older_than`, oldest first.
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<PaymentTransaction>>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// One atomic unit of work. Reads lock the returned row until the unit is
/// committed or rolled back; dropping it without committing rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn create(&mut self, new: NewTransaction) -> StoreResult<PaymentTransaction>;

    async fn find_by_ref(&mut self, merchant_txn_ref: &str)
        -> StoreResult<Option<PaymentTransaction>>;

    async fn find_by_id(&mut self, id: Uuid) -> StoreResult<Option<PaymentTransaction>>;

    async fn update(&mut self, id: Uuid, patch: TransactionPatch) -> StoreResult<PaymentTransaction>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

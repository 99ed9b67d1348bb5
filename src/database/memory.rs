//! Process-local store used by tests and `STORE_BACKEND=memory` runs.
//!
//! A unit of work holds the table lock for its whole lifetime, which gives
//! serializable isolation. Plain reads on the store wait for open units of
//! work to finish.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    NewTransaction, PaymentTransaction, TransactionPatch, TransactionStatus,
};
use crate::database::store::{StoreResult, TransactionStore, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type Table = HashMap<Uuid, PaymentTransaction>;

#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    table: Arc<Mutex<Table>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, bypassing the state machine.
    pub async fn seed(&self, record: PaymentTransaction) {
        self.table.lock().await.insert(record.id, record);
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.table.clone().lock_owned().await;
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged: HashMap::new(),
        }))
    }

    async fn find_by_ref(&self, merchant_txn_ref: &str) -> StoreResult<Option<PaymentTransaction>> {
        let table = self.table.lock().await;
        Ok(table
            .values()
            .find(|r| r.merchant_txn_ref == merchant_txn_ref)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<PaymentTransaction>> {
        Ok(self.table.lock().await.get(&id).cloned())
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<PaymentTransaction>> {
        let table = self.table.lock().await;
        let mut stale: Vec<PaymentTransaction> = table
            .values()
            .filter(|r| r.status == TransactionStatus::Pending && r.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        stale.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(stale)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Table>,
    staged: Table,
}

impl InMemoryUnitOfWork {
    fn current(&self, id: &Uuid) -> Option<&PaymentTransaction> {
        self.staged.get(id).or_else(|| self.guard.get(id))
    }

    fn ref_taken(&self, merchant_txn_ref: &str) -> bool {
        self.staged
            .values()
            .chain(self.guard.values())
            .any(|r| r.merchant_txn_ref == merchant_txn_ref)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn create(&mut self, new: NewTransaction) -> StoreResult<PaymentTransaction> {
        if self.ref_taken(&new.merchant_txn_ref) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payment_transactions_merchant_txn_ref_key".to_string(),
            }));
        }
        let record = new.into_record(Utc::now());
        self.staged.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_ref(
        &mut self,
        merchant_txn_ref: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let id = self
            .staged
            .values()
            .chain(self.guard.values())
            .find(|r| r.merchant_txn_ref == merchant_txn_ref)
            .map(|r| r.id);
        Ok(id.and_then(|id| self.current(&id).cloned()))
    }

    async fn find_by_id(&mut self, id: Uuid) -> StoreResult<Option<PaymentTransaction>> {
        Ok(self.current(&id).cloned())
    }

    async fn update(&mut self, id: Uuid, patch: TransactionPatch) -> StoreResult<PaymentTransaction> {
        let mut record = self
            .current(&id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("payment_transaction", id))?;
        patch.apply_to(&mut record, Utc::now());
        self.staged.insert(id, record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryUnitOfWork { mut guard, staged } = *self;
        guard.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Duration;

    fn new_txn(reference: &str) -> NewTransaction {
        NewTransaction {
            merchant_txn_ref: reference.to_string(),
            order_info: "Order#1".to_string(),
            amount: BigDecimal::from(100),
            currency: "AED".to_string(),
            customer_email: None,
            customer_phone: None,
            return_url: None,
            client_ip: None,
        }
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryTransactionStore::new();
        let mut uow = store.begin().await.expect("begin");
        let created = uow.create(new_txn("TXN-A")).await.expect("create");
        uow.update(
            created.id,
            TransactionPatch {
                vpc_data: Some(serde_json::json!({"vpc_Amount": "10000"})),
                ..Default::default()
            },
        )
        .await
        .expect("update");
        uow.commit().await.expect("commit");

        let found = store
            .find_by_ref("TXN-A")
            .await
            .expect("read")
            .expect("present");
        assert_eq!(found.id, created.id);
        assert!(found.vpc_data.is_some());
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let store = InMemoryTransactionStore::new();

        let mut uow = store.begin().await.expect("begin");
        uow.create(new_txn("TXN-B")).await.expect("create");
        uow.rollback().await.expect("rollback");

        {
            let mut uow = store.begin().await.expect("begin");
            uow.create(new_txn("TXN-C")).await.expect("create");
        }

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn merchant_reference_is_unique() {
        let store = InMemoryTransactionStore::new();
        let mut uow = store.begin().await.expect("begin");
        uow.create(new_txn("TXN-D")).await.expect("create");
        uow.commit().await.expect("commit");

        let mut uow = store.begin().await.expect("begin");
        let err = uow.create(new_txn("TXN-D")).await.expect_err("duplicate");
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = InMemoryTransactionStore::new();
        let mut uow = store.begin().await.expect("begin");
        let err = uow
            .update(Uuid::new_v4(), TransactionPatch::default())
            .await
            .expect_err("missing");
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
    }

    #[tokio::test]
    async fn stale_pending_is_oldest_first_and_bounded() {
        let store = InMemoryTransactionStore::new();
        let now = Utc::now();
        for (i, minutes) in [10_i64, 30, 20, 1].iter().enumerate() {
            let mut record = new_txn(&format!("TXN-{}", i)).into_record(now - Duration::minutes(*minutes));
            if i == 2 {
                record.status = TransactionStatus::Success;
            }
            store.seed(record).await;
        }

        let stale = store
            .find_stale_pending(now - Duration::minutes(5), 50)
            .await
            .expect("query");
        let refs: Vec<&str> = stale.iter().map(|r| r.merchant_txn_ref.as_str()).collect();
        assert_eq!(refs, vec!["TXN-1", "TXN-0"]);

        let limited = store
            .find_stale_pending(now - Duration::minutes(5), 1)
            .await
            .expect("query");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].merchant_txn_ref, "TXN-1");
    }
}

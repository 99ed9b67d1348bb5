//! Reconciliation worker against a wiremock gateway.

mod common;

use common::{harness, record, signed_form, Harness, QUERY_PATH};
use std::sync::Arc;
use std::time::Duration;
use vpc_payments::database::models::TransactionStatus;
use vpc_payments::database::TransactionStore;
use vpc_payments::services::RefundFailureMode;
use vpc_payments::workers::{
    JobScheduler, ReconciliationConfig, ReconciliationWorker, SchedulerConfig, TriggerSource,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

fn worker(h: &Harness) -> ReconciliationWorker {
    ReconciliationWorker::new(
        h.payments.clone(),
        ReconciliationConfig {
            stale_after: Duration::from_secs(300),
            batch_size: 50,
            query_delay: Duration::ZERO,
        },
    )
}

async fn answer_query(h: &Harness, merchant_txn_ref: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("vpc_Command=queryDR"))
        .and(body_string_contains(format!(
            "vpc_MerchTxnRef={}",
            merchant_txn_ref
        )))
        .respond_with(response)
        .mount(&h.server)
        .await;
}

// --- settling drift ---------------------------------------------------------

#[tokio::test]
async fn stale_pending_is_settled_once() {
    let h = harness(RefundFailureMode::Distinguish).await;
    let stale = record("TXN1700000000000bbbb0001", "25.00", 6);
    h.store.seed(stale).await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0001",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0001"),
            ("vpc_DRExists", "Y"),
            ("vpc_TxnResponseCode", "0"),
            ("vpc_TransactionNo", "7001"),
        ])),
    )
    .await;

    let worker = worker(&h);
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.processed_count, 1);
    assert_eq!(first.updated_count, 1);
    assert_eq!(first.error_count, 0);

    let settled = h
        .store
        .find_by_ref("TXN1700000000000bbbb0001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, TransactionStatus::Success);
    assert_eq!(settled.transaction_id.as_deref(), Some("7001"));

    let second = worker.run_once().await.unwrap();
    assert_eq!(second.processed_count, 0);
    assert_eq!(second.updated_count, 0);
}

#[tokio::test]
async fn overlapping_runs_settle_a_record_once() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0009", "25.00", 6))
        .await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0009",
        ResponseTemplate::new(200)
            .set_body_string(signed_form(&[
                ("vpc_MerchTxnRef", "TXN1700000000000bbbb0009"),
                ("vpc_DRExists", "Y"),
                ("vpc_TxnResponseCode", "0"),
                ("vpc_TransactionNo", "7009"),
            ]))
            .set_delay(Duration::from_millis(200)),
    )
    .await;

    let worker = worker(&h);
    let (a, b) = tokio::join!(worker.run_once(), worker.run_once());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.updated_count + b.updated_count, 1);
    for run in [&a, &b] {
        assert_eq!(run.error_count, 0);
        assert_eq!(
            run.processed_count,
            run.updated_count + run.skipped_count + run.error_count
        );
    }

    let stored = h
        .store
        .find_by_ref("TXN1700000000000bbbb0009")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(stored.transaction_id.as_deref(), Some("7009"));
}

#[tokio::test]
async fn fresh_pending_is_left_alone() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0002", "25.00", 1))
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.processed_count, 0);
}

#[tokio::test]
async fn declined_payment_is_marked_failed() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0003", "25.00", 10))
        .await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0003",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0003"),
            ("vpc_TxnResponseCode", "4"),
        ])),
    )
    .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.updated_count, 1);
    let stored = h
        .store
        .find_by_ref("TXN1700000000000bbbb0003")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
}

// --- nothing to apply -------------------------------------------------------

#[tokio::test]
async fn unmapped_codes_and_missing_records_are_skipped() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0004", "25.00", 10))
        .await;
    h.store
        .seed(record("TXN1700000000000bbbb0005", "25.00", 9))
        .await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0004",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0004"),
            ("vpc_TxnResponseCode", "P"),
        ])),
    )
    .await;
    answer_query(
        &h,
        "TXN1700000000000bbbb0005",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0005"),
            ("vpc_DRExists", "N"),
            ("vpc_TxnResponseCode", "0"),
        ])),
    )
    .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.processed_count, 2);
    assert_eq!(result.skipped_count, 2);
    assert_eq!(result.updated_count, 0);

    for merchant_txn_ref in ["TXN1700000000000bbbb0004", "TXN1700000000000bbbb0005"] {
        let stored = h.store.find_by_ref(merchant_txn_ref).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
    }
}

// --- failures ---------------------------------------------------------------

#[tokio::test]
async fn gateway_outage_is_recorded_as_retryable() {
    let h = harness(RefundFailureMode::Distinguish).await;
    let stale = record("TXN1700000000000bbbb0006", "25.00", 10);
    let id = stale.id;
    h.store.seed(stale).await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0006",
        ResponseTemplate::new(502).set_body_string("bad gateway"),
    )
    .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.processed_count, 1);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].transaction_id, id);
    assert!(result.errors[0].retryable);

    let stored = h.store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn answer_for_another_reference_is_an_error() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0007", "25.00", 10))
        .await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0007",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb9999"),
            ("vpc_TxnResponseCode", "0"),
        ])),
    )
    .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.error_count, 1);
    assert!(!result.errors[0].retryable);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0008", "25.00", 12))
        .await;
    h.store
        .seed(record("TXN1700000000000bbbb0009", "25.00", 11))
        .await;

    answer_query(
        &h,
        "TXN1700000000000bbbb0008",
        ResponseTemplate::new(500).set_body_string("oops"),
    )
    .await;
    answer_query(
        &h,
        "TXN1700000000000bbbb0009",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0009"),
            ("vpc_TxnResponseCode", "0"),
        ])),
    )
    .await;

    let result = worker(&h).run_once().await.unwrap();
    assert_eq!(result.processed_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.updated_count, 1);
}

// --- scheduled --------------------------------------------------------------

#[tokio::test]
async fn manual_trigger_runs_the_worker() {
    let h = harness(RefundFailureMode::Distinguish).await;
    h.store
        .seed(record("TXN1700000000000bbbb0010", "25.00", 10))
        .await;
    answer_query(
        &h,
        "TXN1700000000000bbbb0010",
        ResponseTemplate::new(200).set_body_string(signed_form(&[
            ("vpc_MerchTxnRef", "TXN1700000000000bbbb0010"),
            ("vpc_TxnResponseCode", "0"),
        ])),
    )
    .await;

    let scheduler = JobScheduler::new(Arc::new(worker(&h)), SchedulerConfig::default());
    scheduler.trigger_now().await;
    let summary = scheduler.run_next().await.expect("queued run");

    assert_eq!(summary.source, TriggerSource::Manual);
    assert!(summary.success);
    assert_eq!(summary.output.map(|r| r.updated_count), Some(1));
    assert_eq!(scheduler.status().await.completed, 1);
}

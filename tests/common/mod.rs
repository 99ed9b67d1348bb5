//! Shared fixtures: a VPC gateway pointed at a wiremock server and an
//! in-memory store.

#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use vpc_payments::database::models::{NewTransaction, PaymentTransaction, TransactionStatus};
use vpc_payments::database::InMemoryTransactionStore;
use vpc_payments::payments::providers::{VpcConfig, VpcGateway};
use vpc_payments::payments::secure_hash::{self, SecureHashAlgorithm};
use vpc_payments::payments::types::GatewayParams;
use vpc_payments::services::{PaymentService, RefundFailureMode};
use wiremock::MockServer;

pub const SECRET: &str = "0123456789ABCDEF0123456789ABCDEF";
pub const QUERY_PATH: &str = "/vpcdps";

pub struct Harness {
    pub server: MockServer,
    pub store: InMemoryTransactionStore,
    pub payments: Arc<PaymentService>,
}

pub fn gateway_config(server_uri: &str) -> VpcConfig {
    VpcConfig {
        payment_url: format!("{}/vpcpay", server_uri),
        query_url: format!("{}{}", server_uri, QUERY_PATH),
        merchant_id: "TESTMERCHANT".to_string(),
        access_code: "ACCESS01".to_string(),
        secure_secret: SECRET.to_string(),
        hash_algorithm: SecureHashAlgorithm::Sha256,
        user: Some("recon".to_string()),
        password: Some("s3cret".to_string()),
        return_url: "https://shop.test/payments/callback".to_string(),
        timeout_secs: 5,
        ..Default::default()
    }
}

pub async fn harness(mode: RefundFailureMode) -> Harness {
    let server = MockServer::start().await;
    let store = InMemoryTransactionStore::new();
    let gateway = VpcGateway::new(gateway_config(&server.uri())).expect("gateway config");
    let payments = Arc::new(
        PaymentService::new(Arc::new(store.clone()), Arc::new(gateway))
            .with_refund_failure_mode(mode),
    );
    Harness {
        server,
        store,
        payments,
    }
}

pub fn params(pairs: &[(&str, &str)]) -> GatewayParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parameters signed the way the gateway signs its answers.
pub fn signed(pairs: &[(&str, &str)]) -> GatewayParams {
    let mut params = params(pairs);
    secure_hash::attach_signature(&mut params, SECRET, SecureHashAlgorithm::Sha256);
    params
}

/// Form-encoded gateway body, signed.
pub fn signed_form(pairs: &[(&str, &str)]) -> String {
    form(&signed(pairs))
}

pub fn form(params: &GatewayParams) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

pub fn amount(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).expect("decimal")
}

/// A record as it would look after creation, aged by `minutes_old`.
pub fn record(merchant_txn_ref: &str, total: &str, minutes_old: i64) -> PaymentTransaction {
    let created = Utc::now() - Duration::minutes(minutes_old);
    NewTransaction {
        merchant_txn_ref: merchant_txn_ref.to_string(),
        order_info: "Order 1001".to_string(),
        amount: amount(total),
        currency: "USD".to_string(),
        customer_email: Some("buyer@shop.test".to_string()),
        customer_phone: None,
        return_url: None,
        client_ip: None,
    }
    .into_record(created)
}

/// A settled payment the gateway knows as `transaction_no`.
pub fn settled(merchant_txn_ref: &str, total: &str, transaction_no: &str) -> PaymentTransaction {
    let mut record = record(merchant_txn_ref, total, 30);
    record.status = TransactionStatus::Success;
    record.transaction_id = Some(transaction_no.to_string());
    record.response_code = Some("0".to_string());
    record
}

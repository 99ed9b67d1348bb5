//! MIGS / VPC ("Virtual Payment Client") gateway.

use crate::database::models::{PaymentTransaction, TransactionStatus};
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::secure_hash::{
    self, SecureHashAlgorithm, SECURE_HASH_FIELD, SECURE_HASH_TYPE_FIELD,
};
use crate::payments::types::{
    params_to_json, put_opt, GatewayCommand, GatewayOutcome, GatewayParams, GatewayResponse,
    RefundCommand, RefundReply, SignedRequest,
};
use crate::payments::utils::{build_url, to_minor_units, GatewayHttpClient};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

pub const VPC_VERSION: &str = "1";

pub const FIELD_VERSION: &str = "vpc_Version";
pub const FIELD_COMMAND: &str = "vpc_Command";
pub const FIELD_ACCESS_CODE: &str = "vpc_AccessCode";
pub const FIELD_MERCHANT: &str = "vpc_Merchant";
pub const FIELD_MERCH_TXN_REF: &str = "vpc_MerchTxnRef";
pub const FIELD_ORDER_INFO: &str = "vpc_OrderInfo";
pub const FIELD_AMOUNT: &str = "vpc_Amount";
pub const FIELD_CURRENCY: &str = "vpc_Currency";
pub const FIELD_RETURN_URL: &str = "vpc_ReturnURL";
pub const FIELD_LOCALE: &str = "vpc_Locale";
pub const FIELD_USER: &str = "vpc_User";
pub const FIELD_PASSWORD: &str = "vpc_Password";
pub const FIELD_TRANS_NO: &str = "vpc_TransNo";

pub const FIELD_RESPONSE_CODE: &str = "vpc_TxnResponseCode";
pub const FIELD_TRANSACTION_NO: &str = "vpc_TransactionNo";
pub const FIELD_MESSAGE: &str = "vpc_Message";
pub const FIELD_AUTHORIZE_ID: &str = "vpc_AuthorizeId";
pub const FIELD_RECEIPT_NO: &str = "vpc_ReceiptNo";
pub const FIELD_BATCH_NO: &str = "vpc_BatchNo";
pub const FIELD_DR_EXISTS: &str = "vpc_DRExists";

const DECLINE_CODES: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "A", "B", "C", "D", "E", "F", "I", "L", "N", "R",
    "S", "T", "U", "V",
];

/// Maps a `vpc_TxnResponseCode` onto a terminal state. `P` (pending), `?`
/// and unknown codes return `None`.
pub fn map_response_code(code: &str) -> Option<TransactionStatus> {
    let code = code.trim();
    if code == "0" {
        Some(TransactionStatus::Success)
    } else if DECLINE_CODES.contains(&code) {
        Some(TransactionStatus::Failed)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct VpcConfig {
    pub payment_url: String,
    pub query_url: String,
    pub merchant_id: String,
    pub access_code: String,
    pub secure_secret: String,
    pub hash_algorithm: SecureHashAlgorithm,
    pub user: Option<String>,
    pub password: Option<String>,
    pub return_url: String,
    pub locale: String,
    pub timeout_secs: u64,
}

impl Default for VpcConfig {
    fn default() -> Self {
        Self {
            payment_url: String::new(),
            query_url: String::new(),
            merchant_id: String::new(),
            access_code: String::new(),
            secure_secret: String::new(),
            hash_algorithm: SecureHashAlgorithm::Sha256,
            user: None,
            password: None,
            return_url: String::new(),
            locale: "en".to_string(),
            timeout_secs: 30,
        }
    }
}

impl VpcConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        let hash_algorithm = match std::env::var("VPC_HASH_ALGORITHM") {
            Ok(v) if !v.trim().is_empty() => v.parse::<SecureHashAlgorithm>()?,
            _ => SecureHashAlgorithm::Sha256,
        };

        let config = Self {
            payment_url: var("VPC_PAYMENT_URL"),
            query_url: var("VPC_QUERY_URL"),
            merchant_id: var("VPC_MERCHANT_ID"),
            access_code: var("VPC_ACCESS_CODE"),
            secure_secret: var("VPC_SECURE_SECRET"),
            hash_algorithm,
            user: std::env::var("VPC_USER").ok().filter(|v| !v.trim().is_empty()),
            password: std::env::var("VPC_PASSWORD")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            return_url: var("VPC_RETURN_URL"),
            locale: std::env::var("VPC_LOCALE").unwrap_or_else(|_| "en".to_string()),
            timeout_secs: std::env::var("VPC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        };
        config.validate()?;
        Ok(config)
    }

    /// Every mandatory field must be present and both gateway URLs must parse.
    pub fn validate(&self) -> GatewayResult<()> {
        let missing: Vec<&str> = [
            ("VPC_PAYMENT_URL", &self.payment_url),
            ("VPC_QUERY_URL", &self.query_url),
            ("VPC_MERCHANT_ID", &self.merchant_id),
            ("VPC_ACCESS_CODE", &self.access_code),
            ("VPC_SECURE_SECRET", &self.secure_secret),
            ("VPC_RETURN_URL", &self.return_url),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(GatewayError::Configuration {
                message: format!("missing gateway settings: {}", missing.join(", ")),
            });
        }

        for url in [&self.payment_url, &self.query_url, &self.return_url] {
            url::Url::parse(url).map_err(|e| GatewayError::Configuration {
                message: format!("invalid gateway URL '{}': {}", url, e),
            })?;
        }

        if self.timeout_secs == 0 {
            return Err(GatewayError::Configuration {
                message: "gateway timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

pub struct VpcGateway {
    config: VpcConfig,
    http: GatewayHttpClient,
}

impl VpcGateway {
    pub fn new(config: VpcConfig) -> GatewayResult<Self> {
        config.validate()?;
        if config.hash_algorithm == SecureHashAlgorithm::Sha256
            && !secure_hash::secret_is_hex(&config.secure_secret)
        {
            warn!("VPC secure secret is not hex; SHA256 signing will use its raw bytes");
        }
        let http = GatewayHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(VpcConfig::from_env()?)
    }

    pub fn config(&self) -> &VpcConfig {
        &self.config
    }

    fn base_params(&self, command: GatewayCommand) -> GatewayParams {
        let mut params = GatewayParams::new();
        params.insert(FIELD_VERSION.to_string(), VPC_VERSION.to_string());
        params.insert(FIELD_COMMAND.to_string(), command.as_str().to_string());
        params.insert(FIELD_ACCESS_CODE.to_string(), self.config.access_code.clone());
        params.insert(FIELD_MERCHANT.to_string(), self.config.merchant_id.clone());
        params
    }

    fn with_credentials(&self, params: &mut GatewayParams) {
        put_opt(params, FIELD_USER, self.config.user.as_deref());
        put_opt(params, FIELD_PASSWORD, self.config.password.as_deref());
    }

    fn sign(&self, command: GatewayCommand, mut params: GatewayParams) -> SignedRequest {
        secure_hash::attach_signature(
            &mut params,
            &self.config.secure_secret,
            self.config.hash_algorithm,
        );
        SignedRequest { command, params }
    }

    /// Algorithm named by the parameters themselves, else the configured one.
    fn algorithm_for(&self, params: &GatewayParams) -> SecureHashAlgorithm {
        params
            .get(SECURE_HASH_TYPE_FIELD)
            .and_then(|v| v.parse::<SecureHashAlgorithm>().ok())
            .unwrap_or(self.config.hash_algorithm)
    }

    fn check_signature(&self, params: &GatewayParams) -> GatewayResult<()> {
        let algorithm = self.algorithm_for(params);
        if secure_hash::verify(params, &self.config.secure_secret, algorithm) {
            Ok(())
        } else {
            Err(GatewayError::Integrity {
                message: format!("{} signature mismatch", algorithm),
            })
        }
    }

    /// Server-to-server answers are only checked when they carry a signature.
    fn verify_response(&self, response: &GatewayResponse) -> GatewayResult<()> {
        match response.get(SECURE_HASH_FIELD) {
            Some(v) if !v.trim().is_empty() => self.check_signature(&response.params),
            _ => Ok(()),
        }
    }

    async fn send(&self, request: &SignedRequest) -> GatewayResult<GatewayResponse> {
        let response = self
            .http
            .post_form(&self.config.query_url, &request.params)
            .await?;
        self.verify_response(&response)?;
        Ok(response)
    }
}

fn non_blank(params: &GatewayParams, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn minor_units(amount: &bigdecimal::BigDecimal) -> GatewayResult<String> {
    to_minor_units(amount)
        .map(|v| v.to_string())
        .ok_or_else(|| GatewayError::Configuration {
            message: format!("amount {} cannot be expressed in minor units", amount),
        })
}

#[async_trait]
impl PaymentGateway for VpcGateway {
    fn name(&self) -> &'static str {
        "vpc"
    }

    fn build_payment_request(
        &self,
        transaction: &PaymentTransaction,
    ) -> GatewayResult<SignedRequest> {
        let mut params = self.base_params(GatewayCommand::Pay);
        params.insert(
            FIELD_MERCH_TXN_REF.to_string(),
            transaction.merchant_txn_ref.clone(),
        );
        params.insert(FIELD_ORDER_INFO.to_string(), transaction.order_info.clone());
        params.insert(FIELD_AMOUNT.to_string(), minor_units(&transaction.amount)?);
        params.insert(FIELD_CURRENCY.to_string(), transaction.currency.clone());
        params.insert(FIELD_LOCALE.to_string(), self.config.locale.clone());
        params.insert(
            FIELD_RETURN_URL.to_string(),
            transaction
                .return_url
                .clone()
                .unwrap_or_else(|| self.config.return_url.clone()),
        );
        Ok(self.sign(GatewayCommand::Pay, params))
    }

    fn redirect_url(&self, request: &SignedRequest) -> GatewayResult<String> {
        let present: GatewayParams = request
            .params
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        build_url(&self.config.payment_url, &present)
    }

    async fn query(&self, merchant_txn_ref: &str) -> GatewayResult<GatewayResponse> {
        let mut params = self.base_params(GatewayCommand::QueryDr);
        params.insert(FIELD_MERCH_TXN_REF.to_string(), merchant_txn_ref.to_string());
        self.with_credentials(&mut params);
        let request = self.sign(GatewayCommand::QueryDr, params);

        let response = self.send(&request).await?;
        info!(
            merchant_txn_ref = %merchant_txn_ref,
            http_status = response.http_status,
            response_code = ?response.get(FIELD_RESPONSE_CODE),
            "vpc query completed"
        );
        Ok(response)
    }

    async fn refund(&self, command: &RefundCommand) -> GatewayResult<RefundReply> {
        let mut params = self.base_params(GatewayCommand::Refund);
        params.insert(FIELD_MERCH_TXN_REF.to_string(), command.refund_ref.clone());
        params.insert(
            FIELD_TRANS_NO.to_string(),
            command.gateway_transaction_no.clone(),
        );
        params.insert(FIELD_AMOUNT.to_string(), minor_units(&command.amount)?);
        self.with_credentials(&mut params);
        let request = self.sign(GatewayCommand::Refund, params);

        let response = self.send(&request).await?;
        let response_code = non_blank(&response.params, FIELD_RESPONSE_CODE);
        let approved = response_code.as_deref() == Some("0");
        info!(
            refund_ref = %command.refund_ref,
            original_ref = %command.original_ref,
            approved,
            response_code = ?response_code,
            "vpc refund completed"
        );

        Ok(RefundReply {
            approved,
            response_code,
            response_message: non_blank(&response.params, FIELD_MESSAGE),
            transaction_id: non_blank(&response.params, FIELD_TRANSACTION_NO),
            raw: params_to_json(&response.params),
        })
    }

    fn verify_callback(&self, params: &GatewayParams) -> GatewayResult<()> {
        if non_blank(params, SECURE_HASH_FIELD).is_none() {
            return Err(GatewayError::Integrity {
                message: "callback carries no secure hash".to_string(),
            });
        }
        self.check_signature(params)
    }

    fn outcome_from_params(
        &self,
        params: &GatewayParams,
        expected_ref: Option<&str>,
    ) -> GatewayResult<GatewayOutcome> {
        let echoed = non_blank(params, FIELD_MERCH_TXN_REF);
        let merchant_txn_ref = match (echoed, expected_ref) {
            (Some(echoed), Some(expected)) if echoed != expected => {
                return Err(GatewayError::InvalidResponse {
                    message: format!(
                        "gateway answered for {} while {} was queried",
                        echoed, expected
                    ),
                });
            }
            (Some(echoed), _) => echoed,
            (None, Some(expected)) => expected.to_string(),
            (None, None) => {
                return Err(GatewayError::InvalidResponse {
                    message: format!("{} missing from gateway parameters", FIELD_MERCH_TXN_REF),
                });
            }
        };

        let response_code = non_blank(params, FIELD_RESPONSE_CODE);
        let record_exists = non_blank(params, FIELD_DR_EXISTS)
            .map(|v| !v.eq_ignore_ascii_case("N"))
            .unwrap_or(true);
        let status = if record_exists {
            response_code.as_deref().and_then(map_response_code)
        } else {
            None
        };

        Ok(GatewayOutcome {
            merchant_txn_ref,
            response_code,
            status,
            transaction_id: non_blank(params, FIELD_TRANSACTION_NO),
            response_message: non_blank(params, FIELD_MESSAGE),
            auth_code: non_blank(params, FIELD_AUTHORIZE_ID),
            receipt_no: non_blank(params, FIELD_RECEIPT_NO),
            batch_no: non_blank(params, FIELD_BATCH_NO),
            raw: params_to_json(params),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewTransaction;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;

    const SECRET: &str = "ABCDEF0123456789ABCDEF0123456789";

    fn config() -> VpcConfig {
        VpcConfig {
            payment_url: "https://migs.test/vpcpay".to_string(),
            query_url: "https://migs.test/vpcdps".to_string(),
            merchant_id: "TESTMERCHANT".to_string(),
            access_code: "ACC123".to_string(),
            secure_secret: SECRET.to_string(),
            user: Some("ama".to_string()),
            password: Some("pw".to_string()),
            return_url: "https://shop.test/payments/callback".to_string(),
            ..Default::default()
        }
    }

    fn gateway() -> VpcGateway {
        VpcGateway::new(config()).expect("valid config")
    }

    fn transaction() -> PaymentTransaction {
        NewTransaction {
            merchant_txn_ref: "TXN1700000000000abcd1234".to_string(),
            order_info: "Order#1".to_string(),
            amount: BigDecimal::from_str("100.00").expect("decimal"),
            currency: "AED".to_string(),
            customer_email: None,
            customer_phone: None,
            return_url: None,
            client_ip: None,
        }
        .into_record(Utc::now())
    }

    fn signed(pairs: &[(&str, &str)]) -> GatewayParams {
        let mut params: GatewayParams = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        secure_hash::attach_signature(&mut params, SECRET, SecureHashAlgorithm::Sha256);
        params
    }

    #[test]
    fn code_table() {
        assert_eq!(map_response_code("0"), Some(TransactionStatus::Success));
        for code in ["1", "5", "7", "A", "E", "F", "V"] {
            assert_eq!(map_response_code(code), Some(TransactionStatus::Failed));
        }
        assert_eq!(map_response_code("P"), None);
        assert_eq!(map_response_code("?"), None);
        assert_eq!(map_response_code("Z"), None);
    }

    #[test]
    fn missing_settings_fail_fast() {
        let mut cfg = config();
        cfg.merchant_id = " ".to_string();
        cfg.secure_secret.clear();
        match VpcGateway::new(cfg) {
            Err(GatewayError::Configuration { message }) => {
                assert!(message.contains("VPC_MERCHANT_ID"));
                assert!(message.contains("VPC_SECURE_SECRET"));
            }
            _ => panic!("expected configuration error"),
        }

        let mut cfg = config();
        cfg.payment_url = "not a url".to_string();
        assert!(VpcGateway::new(cfg).is_err());
    }

    #[test]
    fn pay_request_is_signed_with_minor_units() {
        let gateway = gateway();
        let request = gateway
            .build_payment_request(&transaction())
            .expect("request");

        assert_eq!(request.command, GatewayCommand::Pay);
        assert_eq!(request.params[FIELD_AMOUNT], "10000");
        assert_eq!(request.params[FIELD_COMMAND], "pay");
        assert_eq!(request.params[FIELD_VERSION], "1");
        assert_eq!(
            request.params[FIELD_RETURN_URL],
            "https://shop.test/payments/callback"
        );
        assert_eq!(request.params[SECURE_HASH_TYPE_FIELD], "SHA256");
        assert!(!request.params.contains_key(FIELD_PASSWORD));
        assert!(secure_hash::verify(
            &request.params,
            SECRET,
            SecureHashAlgorithm::Sha256
        ));

        let url = gateway.redirect_url(&request).expect("url");
        assert!(url.starts_with("https://migs.test/vpcpay?"));
        assert!(url.contains("vpc_Amount=10000"));
        assert!(url.contains("vpc_SecureHash="));
    }

    #[test]
    fn callback_without_or_with_bad_signature_is_rejected() {
        let gateway = gateway();
        let mut params = signed(&[
            (FIELD_MERCH_TXN_REF, "TXN1"),
            (FIELD_RESPONSE_CODE, "0"),
        ]);
        assert!(gateway.verify_callback(&params).is_ok());

        params.insert(FIELD_RESPONSE_CODE.to_string(), "1".to_string());
        assert!(matches!(
            gateway.verify_callback(&params),
            Err(GatewayError::Integrity { .. })
        ));

        params.remove(SECURE_HASH_FIELD);
        assert!(matches!(
            gateway.verify_callback(&params),
            Err(GatewayError::Integrity { .. })
        ));
    }

    #[test]
    fn callback_signed_with_md5_tag_is_checked_with_md5() {
        let gateway = gateway();
        let mut params: GatewayParams = [(FIELD_MERCH_TXN_REF, "TXN1"), (FIELD_RESPONSE_CODE, "0")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        secure_hash::attach_signature(&mut params, SECRET, SecureHashAlgorithm::Md5);
        assert!(gateway.verify_callback(&params).is_ok());
    }

    #[test]
    fn outcome_maps_fields() {
        let gateway = gateway();
        let params = signed(&[
            (FIELD_MERCH_TXN_REF, "TXN1"),
            (FIELD_RESPONSE_CODE, "0"),
            (FIELD_TRANSACTION_NO, "123456"),
            (FIELD_MESSAGE, "Approved"),
            (FIELD_AUTHORIZE_ID, "AUTH1"),
            (FIELD_RECEIPT_NO, "RCPT1"),
            (FIELD_BATCH_NO, "20240101"),
        ]);
        let outcome = gateway.outcome_from_params(&params, None).expect("outcome");
        assert_eq!(outcome.merchant_txn_ref, "TXN1");
        assert_eq!(outcome.status, Some(TransactionStatus::Success));
        assert_eq!(outcome.transaction_id.as_deref(), Some("123456"));
        assert_eq!(outcome.auth_code.as_deref(), Some("AUTH1"));
        assert_eq!(outcome.raw[FIELD_TRANSACTION_NO], serde_json::json!("123456"));
    }

    #[test]
    fn stored_outcome_can_be_verified_again() {
        let gateway = gateway();
        let params = signed(&[
            (FIELD_MERCH_TXN_REF, "TXN1"),
            (FIELD_RESPONSE_CODE, "0"),
            (FIELD_AMOUNT, "1.50"),
            (FIELD_BATCH_NO, "007"),
        ]);
        let outcome = gateway.outcome_from_params(&params, None).expect("outcome");
        assert_eq!(outcome.raw[FIELD_AMOUNT], serde_json::json!("1.50"));

        let stored: GatewayParams =
            serde_json::from_value(outcome.raw.clone()).expect("string map");
        assert_eq!(stored, params);
        assert!(gateway.verify_callback(&stored).is_ok());
    }

    #[test]
    fn outcome_rejects_mismatched_or_missing_reference() {
        let gateway = gateway();
        let params = signed(&[(FIELD_MERCH_TXN_REF, "TXN1"), (FIELD_RESPONSE_CODE, "0")]);
        assert!(matches!(
            gateway.outcome_from_params(&params, Some("TXN2")),
            Err(GatewayError::InvalidResponse { .. })
        ));

        let bare = signed(&[(FIELD_RESPONSE_CODE, "0")]);
        assert!(gateway.outcome_from_params(&bare, None).is_err());
        let outcome = gateway
            .outcome_from_params(&bare, Some("TXN3"))
            .expect("fallback ref");
        assert_eq!(outcome.merchant_txn_ref, "TXN3");
    }

    #[test]
    fn unknown_receipt_is_unmapped() {
        let gateway = gateway();
        let params = signed(&[
            (FIELD_MERCH_TXN_REF, "TXN1"),
            (FIELD_RESPONSE_CODE, "0"),
            (FIELD_DR_EXISTS, "N"),
        ]);
        let outcome = gateway.outcome_from_params(&params, Some("TXN1")).expect("outcome");
        assert_eq!(outcome.status, None);

        let pending = signed(&[(FIELD_MERCH_TXN_REF, "TXN1"), (FIELD_RESPONSE_CODE, "P")]);
        let outcome = gateway.outcome_from_params(&pending, None).expect("outcome");
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.response_code.as_deref(), Some("P"));
    }
}

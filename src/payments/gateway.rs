use crate::database::models::PaymentTransaction;
use crate::payments::error::GatewayResult;
use crate::payments::types::{
    GatewayOutcome, GatewayParams, GatewayResponse, RefundCommand, RefundReply, SignedRequest,
};
use async_trait::async_trait;

/// One card gateway integration: build and sign requests, talk to the
/// gateway, verify what comes back and map result codes onto transaction
/// states. The state machine only ever sees this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Signed `pay` parameters for a freshly created transaction.
    fn build_payment_request(&self, transaction: &PaymentTransaction)
        -> GatewayResult<SignedRequest>;

    /// Browser redirect target for a signed `pay` request.
    fn redirect_url(&self, request: &SignedRequest) -> GatewayResult<String>;

    /// Signed status query. A signature on the answer, when present, has
    /// already been verified.
    async fn query(&self, merchant_txn_ref: &str) -> GatewayResult<GatewayResponse>;

    async fn refund(&self, command: &RefundCommand) -> GatewayResult<RefundReply>;

    /// Callback parameters must carry a valid signature; a missing one is an
    /// integrity failure.
    fn verify_callback(&self, params: &GatewayParams) -> GatewayResult<()>;

    /// Normalises callback or query parameters. `expected_ref` is used when
    /// the gateway does not echo the reference and must match when it does.
    fn outcome_from_params(
        &self,
        params: &GatewayParams,
        expected_ref: Option<&str>,
    ) -> GatewayResult<GatewayOutcome>;
}

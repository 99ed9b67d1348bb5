use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures raised while talking to the card gateway.
///
/// Transport problems (`Unreachable`, `Timeout`, `ServerError`) are retryable;
/// anything that says the gateway answered with something we cannot trust or
/// understand is not.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway unreachable: {message}")]
    Unreachable { message: String },

    #[error("Gateway timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Gateway error: HTTP {status}")]
    ServerError { status: u16, body: String },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("Gateway response integrity check failed: {message}")]
    Integrity { message: String },

    #[error("Gateway configuration error: {message}")]
    Configuration { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Unreachable { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::ServerError { .. } => true,
            GatewayError::InvalidResponse { .. } => false,
            GatewayError::Integrity { .. } => false,
            GatewayError::Configuration { .. } => false,
        }
    }

    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout { timeout_secs }
        } else if err.is_connect() || err.is_request() {
            GatewayError::Unreachable {
                message: err.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            GatewayError::InvalidResponse {
                message: format!("failed to read gateway body: {}", err),
            }
        } else {
            GatewayError::Unreachable {
                message: err.to_string(),
            }
        }
    }
}

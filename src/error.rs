//! Domain error taxonomy for payment operations.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::TransactionStatus;
use crate::payments::error::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Machine-readable error codes returned to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigurationError,
    ValidationError,
    TransactionNotFound,
    IllegalState,
    IllegalTransition,
    IntegrityError,
    GatewayUnavailable,
    GatewayTimeout,
    GatewayRejected,
    InvalidGatewayResponse,
    RefundFailed,
    DatabaseError,
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Integrity check failed: {message}")]
    Integrity { message: String },

    #[error("Gateway unavailable: {message}")]
    GatewayUnavailable { message: String },

    #[error("Gateway timeout after {timeout_secs}s")]
    GatewayTimeout { timeout_secs: u64 },

    #[error("Gateway rejected the request: {message}")]
    GatewayRejected {
        response_code: Option<String>,
        message: String,
    },

    #[error("Invalid gateway response: {message}")]
    InvalidGatewayResponse { message: String },

    #[error("Refund failed: {message}")]
    RefundFailed { message: String },

    #[error("Database error: {message}")]
    Database { message: String, retryable: bool },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(id: impl ToString) -> Self {
        PaymentError::NotFound {
            entity: "Transaction".to_string(),
            id: id.to_string(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            PaymentError::Configuration { .. } => ErrorCode::ConfigurationError,
            PaymentError::Validation { .. } => ErrorCode::ValidationError,
            PaymentError::NotFound { .. } => ErrorCode::TransactionNotFound,
            PaymentError::IllegalState { .. } => ErrorCode::IllegalState,
            PaymentError::IllegalTransition { .. } => ErrorCode::IllegalTransition,
            PaymentError::Integrity { .. } => ErrorCode::IntegrityError,
            PaymentError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
            PaymentError::GatewayTimeout { .. } => ErrorCode::GatewayTimeout,
            PaymentError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
            PaymentError::InvalidGatewayResponse { .. } => ErrorCode::InvalidGatewayResponse,
            PaymentError::RefundFailed { .. } => ErrorCode::RefundFailed,
            PaymentError::Database { .. } => ErrorCode::DatabaseError,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::Validation { .. } => 400,
            PaymentError::Integrity { .. } => 400,
            PaymentError::RefundFailed { .. } => 400,
            PaymentError::GatewayRejected { .. } => 402,
            PaymentError::NotFound { .. } => 404,
            PaymentError::IllegalState { .. } => 409,
            PaymentError::IllegalTransition { .. } => 409,
            PaymentError::Configuration { .. } => 500,
            PaymentError::Database { .. } => 500,
            PaymentError::InvalidGatewayResponse { .. } => 502,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::GatewayTimeout { .. } => 504,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::GatewayUnavailable { .. } => true,
            PaymentError::GatewayTimeout { .. } => true,
            PaymentError::Database { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Message safe to show to API clients.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Configuration { .. } => {
                "The payment service is not configured correctly.".to_string()
            }
            PaymentError::Validation { message, .. } => message.clone(),
            PaymentError::NotFound { .. } => "Transaction not found.".to_string(),
            PaymentError::IllegalState { message } => message.clone(),
            PaymentError::IllegalTransition { from, to } => {
                format!("Transaction cannot move from {} to {}.", from, to)
            }
            PaymentError::Integrity { .. } => {
                "The gateway response could not be verified.".to_string()
            }
            PaymentError::GatewayUnavailable { .. } => {
                "The payment gateway is temporarily unavailable. Please try again later."
                    .to_string()
            }
            PaymentError::GatewayTimeout { .. } => {
                "The payment gateway did not respond in time. Please try again later.".to_string()
            }
            PaymentError::GatewayRejected { message, .. } => {
                format!("The payment gateway declined the request: {}", message)
            }
            PaymentError::InvalidGatewayResponse { .. } => {
                "The payment gateway returned an unexpected response.".to_string()
            }
            PaymentError::RefundFailed { .. } => "Refund could not be processed.".to_string(),
            PaymentError::Database { .. } => {
                "An internal error occurred. Please try again later.".to_string()
            }
        }
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unreachable { message } => PaymentError::GatewayUnavailable { message },
            GatewayError::ServerError { status, .. } => PaymentError::GatewayUnavailable {
                message: format!("gateway returned HTTP {}", status),
            },
            GatewayError::Timeout { timeout_secs } => PaymentError::GatewayTimeout { timeout_secs },
            GatewayError::InvalidResponse { message } => {
                PaymentError::InvalidGatewayResponse { message }
            }
            GatewayError::Integrity { message } => PaymentError::Integrity { message },
            GatewayError::Configuration { message } => PaymentError::Configuration { message },
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(err: DatabaseError) -> Self {
        match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => PaymentError::NotFound {
                entity: entity.clone(),
                id: id.clone(),
            },
            _ => PaymentError::Database {
                retryable: err.is_retryable(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_onto_taxonomy() {
        let err: PaymentError = GatewayError::Unreachable {
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), ErrorCode::GatewayUnavailable);
        assert_eq!(err.http_status_code(), 503);
        assert!(err.is_retryable());

        let err: PaymentError = GatewayError::ServerError {
            status: 502,
            body: String::new(),
        }
        .into();
        assert_eq!(err.http_status_code(), 503);

        let err: PaymentError = GatewayError::Timeout { timeout_secs: 30 }.into();
        assert_eq!(err.http_status_code(), 504);
        assert!(err.is_retryable());

        let err: PaymentError = GatewayError::Integrity {
            message: "mismatch".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), ErrorCode::IntegrityError);
        assert_eq!(err.http_status_code(), 400);
        assert!(!err.is_retryable());

        let err: PaymentError = GatewayError::InvalidResponse {
            message: "<html>".to_string(),
        }
        .into();
        assert_eq!(err.http_status_code(), 502);
        assert!(!err.is_retryable());
    }

    #[test]
    fn database_not_found_becomes_not_found() {
        let err: PaymentError = DatabaseError::not_found("payment_transaction", "abc").into();
        assert_eq!(err.http_status_code(), 404);

        let err: PaymentError = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.error_code(), ErrorCode::DatabaseError);
        assert!(err.is_retryable());
    }

    #[test]
    fn status_families() {
        assert_eq!(PaymentError::validation("bad", "amount").http_status_code(), 400);
        assert_eq!(PaymentError::not_found("x").http_status_code(), 404);
        assert_eq!(
            PaymentError::IllegalTransition {
                from: TransactionStatus::Refunded,
                to: TransactionStatus::Success,
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            PaymentError::GatewayRejected {
                response_code: Some("5".to_string()),
                message: "declined".to_string(),
            }
            .http_status_code(),
            402
        );
    }

    #[test]
    fn error_codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_value(ErrorCode::TransactionNotFound).expect("json"),
            serde_json::json!("TRANSACTION_NOT_FOUND")
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::IllegalTransition).expect("json"),
            serde_json::json!("ILLEGAL_TRANSITION")
        );
    }

    #[test]
    fn user_messages_hide_internals() {
        let err = PaymentError::Database {
            message: "relation payment_transactions does not exist".to_string(),
            retryable: false,
        };
        assert!(!err.user_message().contains("relation"));
    }
}

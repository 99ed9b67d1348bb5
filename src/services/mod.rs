//! Services module for business logic

pub mod payment_service;
pub mod webhook_processor;

pub use payment_service::{
    CreatePaymentRequest, CreatedPayment, PaymentService, ReconcileOutcome, RefundFailureMode,
};
pub use webhook_processor::{WebhookAck, WebhookProcessor, WebhookProcessorError};

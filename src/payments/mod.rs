pub mod error;
pub mod gateway;
pub mod providers;
pub mod secure_hash;
pub mod types;
pub mod utils;
pub mod webhook;

pub use error::{GatewayError, GatewayResult};
pub use gateway::PaymentGateway;

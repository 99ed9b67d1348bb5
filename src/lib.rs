//! MIGS/VPC card-payment gateway core: request signing, the transaction
//! state machine, and background reconciliation of pending payments.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

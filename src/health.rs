//! `/health`: transaction store reachability and reconciliation schedule state.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::store::TransactionStore;
use crate::workers::reconciliation::ReconciliationWorker;
use crate::workers::scheduler::JobScheduler;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn TransactionStore>,
    scheduler: Option<JobScheduler<ReconciliationWorker>>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        scheduler: Option<JobScheduler<ReconciliationWorker>>,
    ) -> Self {
        Self { store, scheduler }
    }

    /// Store reachability decides overall health; a paused or failing
    /// reconciliation schedule only degrades it.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut store_up = true;
        let mut degraded = false;

        match timeout(Duration::from_secs(5), check_store_health(self.store.as_ref())).await {
            Ok(Ok(response_time)) => {
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Store health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                store_up = false;
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Store health check failed: {}", e);
            }
            Err(_) => {
                store_up = false;
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Store health check timed out");
            }
        }

        if let Some(scheduler) = &self.scheduler {
            let status = scheduler.status().await;
            let last_failed = status.last_run.as_ref().map(|r| !r.success).unwrap_or(false);
            let component = if status.paused {
                degraded = true;
                ComponentHealth::warning(None, Some("reconciliation paused".to_string()))
            } else if last_failed {
                degraded = true;
                ComponentHealth::warning(
                    None,
                    status.last_run.as_ref().and_then(|r| r.error.clone()),
                )
            } else {
                ComponentHealth {
                    status: ComponentState::Up,
                    response_time_ms: None,
                    details: Some(format!(
                        "waiting={} active={} completed={} failed={} delayed={}",
                        status.waiting,
                        status.active,
                        status.completed,
                        status.failed,
                        status.delayed
                    )),
                }
            };
            if degraded {
                warn!(paused = status.paused, "Reconciliation schedule degraded");
            }
            health_status
                .checks
                .insert("reconciliation".to_string(), component);
        }

        health_status.status = if !store_up {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

pub async fn check_store_health(
    store: &dyn TransactionStore,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match store.health_check().await {
        Ok(()) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

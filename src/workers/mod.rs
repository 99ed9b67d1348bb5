//! Background workers

pub mod reconciliation;
pub mod scheduler;

pub use reconciliation::{
    ReconciliationConfig, ReconciliationError, ReconciliationResult, ReconciliationWorker,
};
pub use scheduler::{
    JobScheduler, RecurringTask, RunSummary, SchedulerConfig, SchedulerStatus, TriggerSource,
};

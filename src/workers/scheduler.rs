//! In-process scheduler for a single recurring task.
//!
//! Runs are queued jobs with a priority. One dispatcher executes them one at
//! a time, so a run in progress is never pre-empted. A primary ticker
//! enqueues on a fixed interval; a slower fallback ticker only enqueues when
//! nothing is waiting, delayed or active. A waiting run absorbs later
//! requests from the same source. A failed run schedules one delayed retry.
//! Tasks must be idempotent: a run can be queued more than once for the
//! same window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

#[async_trait]
pub trait RecurringTask: Send + Sync + 'static {
    type Output: Serialize + Clone + Send + Sync + 'static;
    type Error: std::fmt::Display + Send + 'static;

    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum JobPriority {
    #[default]
    Normal = 1,
    High = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Fallback,
    Manual,
}

impl TriggerSource {
    pub fn priority(&self) -> JobPriority {
        match self {
            TriggerSource::Manual => JobPriority::High,
            TriggerSource::Scheduled | TriggerSource::Fallback => JobPriority::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub fallback_interval: Duration,
    /// Delay before retrying a failed run. Zero disables retries.
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fallback_interval: Duration::from_secs(600),
            retry_delay: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("RECONCILIATION_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.fallback_interval = Duration::from_secs(
            std::env::var("RECONCILIATION_FALLBACK_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.fallback_interval.as_secs()),
        );
        cfg.retry_delay = Duration::from_secs(
            std::env::var("RECONCILIATION_RETRY_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.retry_delay.as_secs()),
        );
        cfg
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<O> {
    pub job_id: JobId,
    pub source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub output: Option<O>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus<O> {
    pub task: &'static str,
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub delayed: usize,
    pub paused: bool,
    pub last_run: Option<RunSummary<O>>,
}

#[derive(Debug, Clone)]
struct QueuedJob {
    id: JobId,
    source: TriggerSource,
    seq: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    /// Higher priority first, then FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        self.source
            .priority()
            .cmp(&other.source.priority())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
struct DelayedJob {
    id: JobId,
    source: TriggerSource,
    due: Instant,
}

struct State<O> {
    queue: BinaryHeap<QueuedJob>,
    delayed: Vec<DelayedJob>,
    active: Option<JobId>,
    completed: u64,
    failed: u64,
    paused: bool,
    last_run: Option<RunSummary<O>>,
    seq: u64,
}

impl<O> State<O> {
    /// Queues `id` unless a run from `source` is already waiting, in which
    /// case that run's id is returned instead.
    fn push(&mut self, id: JobId, source: TriggerSource) -> JobId {
        if let Some(waiting) = self.queue.iter().find(|job| job.source == source) {
            return waiting.id;
        }
        self.seq += 1;
        self.queue.push(QueuedJob {
            id,
            source,
            seq: self.seq,
        });
        id
    }

    fn promote_due(&mut self, now: Instant) {
        let (due, later): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|job| job.due <= now);
        self.delayed = later;
        for job in due {
            self.push(job.id, job.source);
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.delayed.is_empty() && self.active.is_none()
    }
}

pub struct JobScheduler<T: RecurringTask> {
    task: Arc<T>,
    config: SchedulerConfig,
    state: Arc<Mutex<State<T::Output>>>,
    notify: Arc<Notify>,
}

impl<T: RecurringTask> Clone for JobScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            notify: self.notify.clone(),
        }
    }
}

impl<T: RecurringTask> JobScheduler<T> {
    pub fn new(task: Arc<T>, config: SchedulerConfig) -> Self {
        Self {
            task,
            config,
            state: Arc::new(Mutex::new(State {
                queue: BinaryHeap::new(),
                delayed: Vec::new(),
                active: None,
                completed: 0,
                failed: 0,
                paused: false,
                last_run: None,
                seq: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn enqueue(&self, source: TriggerSource) -> JobId {
        let requested = Uuid::new_v4();
        let id = self.state.lock().await.push(requested, source);
        self.notify.notify_one();
        if id == requested {
            info!(task = self.task.name(), job_id = %id, source = ?source, "run enqueued");
        } else {
            debug!(task = self.task.name(), job_id = %id, source = ?source, "run already waiting");
        }
        id
    }

    /// Immediate run ahead of any scheduled ones. Accepted while paused.
    pub async fn trigger_now(&self) -> JobId {
        self.enqueue(TriggerSource::Manual).await
    }

    pub async fn enqueue_in(&self, source: TriggerSource, delay: Duration) -> JobId {
        let id = Uuid::new_v4();
        self.state.lock().await.delayed.push(DelayedJob {
            id,
            source,
            due: Instant::now() + delay,
        });
        self.notify.notify_one();
        info!(
            task = self.task.name(),
            job_id = %id,
            delay_secs = delay.as_secs(),
            "delayed run enqueued"
        );
        id
    }

    /// Enqueues only when nothing is waiting, delayed or running.
    pub async fn enqueue_if_idle(&self, source: TriggerSource) -> Option<JobId> {
        let id = {
            let mut state = self.state.lock().await;
            if !state.is_idle() {
                return None;
            }
            state.push(Uuid::new_v4(), source)
        };
        self.notify.notify_one();
        info!(task = self.task.name(), job_id = %id, source = ?source, "idle run enqueued");
        Some(id)
    }

    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
        info!(task = self.task.name(), "scheduler paused");
    }

    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
        self.notify.notify_one();
        info!(task = self.task.name(), "scheduler resumed");
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn status(&self) -> SchedulerStatus<T::Output> {
        let mut state = self.state.lock().await;
        state.promote_due(Instant::now());
        SchedulerStatus {
            task: self.task.name(),
            waiting: state.queue.len(),
            active: usize::from(state.active.is_some()),
            completed: state.completed,
            failed: state.failed,
            delayed: state.delayed.len(),
            paused: state.paused,
            last_run: state.last_run.clone(),
        }
    }

    /// Executes the highest-priority waiting run, if any. Returns `None`
    /// when paused, idle or when a run is already active.
    pub async fn run_next(&self) -> Option<RunSummary<T::Output>> {
        let job = {
            let mut state = self.state.lock().await;
            if state.paused || state.active.is_some() {
                return None;
            }
            state.promote_due(Instant::now());
            let job = state.queue.pop()?;
            state.active = Some(job.id);
            job
        };

        let started_at = Utc::now();
        info!(task = self.task.name(), job_id = %job.id, source = ?job.source, "run started");
        // A panicking run surfaces as a JoinError so `active` is always cleared.
        let task = self.task.clone();
        let result = match tokio::spawn(async move { task.run().await }).await {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(join_err) => Err(format!("run aborted: {}", join_err)),
        };
        let finished_at = Utc::now();

        let summary = match result {
            Ok(output) => RunSummary {
                job_id: job.id,
                source: job.source,
                started_at,
                finished_at,
                success: true,
                output: Some(output),
                error: None,
            },
            Err(e) => {
                error!(task = self.task.name(), job_id = %job.id, error = %e, "run failed");
                RunSummary {
                    job_id: job.id,
                    source: job.source,
                    started_at,
                    finished_at,
                    success: false,
                    output: None,
                    error: Some(e),
                }
            }
        };

        let retry = {
            let mut state = self.state.lock().await;
            state.active = None;
            if summary.success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            state.last_run = Some(summary.clone());
            !summary.success && state.delayed.is_empty() && !self.config.retry_delay.is_zero()
        };
        if retry {
            self.enqueue_in(job.source, self.config.retry_delay).await;
        }
        Some(summary)
    }

    async fn next_delayed_due(&self) -> Option<Instant> {
        self.state
            .lock()
            .await
            .delayed
            .iter()
            .map(|job| job.due)
            .min()
    }

    async fn drain(&self) {
        while self.run_next().await.is_some() {}
    }

    /// Dispatcher loop. Returns after `shutdown_rx` flips to `true`; a run
    /// in progress finishes first.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            task = self.task.name(),
            interval_secs = self.config.interval.as_secs(),
            fallback_interval_secs = self.config.fallback_interval.as_secs(),
            "scheduler started"
        );

        let mut primary = interval_at(Instant::now() + self.config.interval, self.config.interval);
        primary.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fallback = interval_at(
            Instant::now() + self.config.fallback_interval,
            self.config.fallback_interval,
        );
        fallback.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let next_due = self.next_delayed_due().await;
            let delayed_timer = async move {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(task = self.task.name(), "scheduler stopping");
                        break;
                    }
                }
                _ = primary.tick() => {
                    if self.is_paused().await {
                        warn!(task = self.task.name(), "scheduled tick skipped while paused");
                    } else {
                        self.enqueue(TriggerSource::Scheduled).await;
                    }
                }
                _ = fallback.tick() => {
                    if !self.is_paused().await
                        && self.enqueue_if_idle(TriggerSource::Fallback).await.is_some()
                    {
                        warn!(task = self.task.name(), "fallback trigger enqueued a run");
                    }
                }
                _ = self.notify.notified() => {}
                _ = delayed_timer => {}
            }

            self.drain().await;
        }

        info!(task = self.task.name(), "scheduler stopped");
    }
}

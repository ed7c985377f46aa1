//! Control plane for one migration
//!
//! A [`Scheduler`] owns a migration's connector and inconsistency producer.
//! It flips the migration pattern and starts and stops validation jobs. At
//! most one full and one incremental job run at a time; starting a job of a
//! mode first cancels and joins the previous job of that mode. Each job runs
//! on its own thread with a child of the scheduler's cancel token, so
//! [`Scheduler::shutdown`] stops everything.
//!
//! The [`ControlPlane`] trait is the object-safe surface the executor drives.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dualwrite_connpool::DoubleWritePool;
use dualwrite_core::{
    CancelToken, Direction, Entity, Error, MigrationPattern, Result, Timestamp,
};
use dualwrite_events::Producer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::ValidatorConfig;
use crate::fix_consumer::FixerStatus;
use crate::validator::{ProgressSnapshot, ValidationProgress, Validator};

/// Sleep interval used by incremental jobs when neither the request nor the
/// config names a positive one
pub const DEFAULT_INCREMENTAL_SLEEP_MS: u64 = 1000;

/// Kind of validation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// One pass over every row
    Full,
    /// Poll rows updated after a watermark until stopped
    Incremental,
}

impl ValidationMode {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Full => "full",
            ValidationMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(ValidationMode::Full),
            "incremental" | "incr" => Ok(ValidationMode::Incremental),
            other => Err(Error::InvalidOperation(format!(
                "unknown validation mode: {}",
                other
            ))),
        }
    }
}

/// Per-job overrides of the validator config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationParams {
    /// `SRC` validates src against dst, `DST` the reverse
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// Rows per read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Incremental polling interval. Full jobs are one pass and reject a
    /// positive value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_interval_ms: Option<u64>,
    /// Incremental watermark; defaults to the job's start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
}

fn default_direction() -> Direction {
    Direction::Src
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            direction: default_direction(),
            batch_size: None,
            sleep_interval_ms: None,
            since: None,
        }
    }
}

impl ValidationParams {
    /// Params validating with `direction` and config defaults otherwise
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }
}

/// Lifecycle of a validation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Still scanning
    Running,
    /// One-shot pass finished on its own
    Completed,
    /// Stopped by a stop request, a newer job or shutdown
    Cancelled,
    /// Ended with an error
    Failed,
}

/// Externally visible state of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job kind
    pub mode: ValidationMode,
    /// Direction stamped on the job's events
    pub direction: Direction,
    /// Lifecycle state
    pub state: JobState,
    /// Rows scanned so far
    pub scanned: u64,
    /// Events published so far
    pub events: u64,
    /// Reads that failed and were skipped
    pub read_errors: u64,
    /// Events that could not be published
    pub publish_failures: u64,
    /// When the job started
    pub started_at: Timestamp,
    /// When the job ended, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Failure reason for `Failed` jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of a whole migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Migration name
    pub name: String,
    /// Active pattern
    pub pattern: MigrationPattern,
    /// Latest job of each mode, full first
    pub jobs: Vec<JobStatus>,
    /// Best-effort secondary calls that failed
    pub secondary_failures: u64,
    /// Best-effort secondary writes dropped on a full queue
    pub secondary_dropped: u64,
    /// Shadow reads that disagreed with the authoritative store
    pub shadow_mismatches: u64,
    /// Repair consumer, for migrations that own one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixer: Option<FixerStatus>,
}

/// Object-safe control surface of a migration
pub trait ControlPlane: Send + Sync {
    /// Migration name
    fn name(&self) -> &str;

    /// Switch pattern by name; unknown names leave it unchanged
    fn update_pattern(&self, pattern: &str) -> Result<MigrationPattern>;

    /// Active pattern
    fn pattern(&self) -> MigrationPattern;

    /// Start a job, replacing any job of the same mode
    fn start_validation(&self, mode: ValidationMode, params: ValidationParams) -> Result<JobStatus>;

    /// Stop the job of `mode`; returns whether one was running
    fn stop_validation(&self, mode: ValidationMode) -> Result<bool>;

    /// Current pattern, jobs and connector counters
    fn status(&self) -> MigrationStatus;

    /// Start the repair consumer; returns whether it was stopped before
    fn start_fixer(&self) -> Result<bool> {
        Err(Error::InvalidOperation(format!(
            "migration {} has no repair consumer",
            self.name()
        )))
    }

    /// Stop the repair consumer; returns whether it was running
    fn stop_fixer(&self) -> Result<bool> {
        Err(Error::InvalidOperation(format!(
            "migration {} has no repair consumer",
            self.name()
        )))
    }

    /// Stop every job and background task and drain best-effort work
    fn shutdown(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct JobOutcome {
    state: JobState,
    finished_at: Timestamp,
    error: Option<String>,
}

struct JobRecord {
    mode: ValidationMode,
    direction: Direction,
    started_at: Timestamp,
    progress: Arc<ValidationProgress>,
    outcome: Arc<Mutex<Option<JobOutcome>>>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl JobRecord {
    fn status(&self) -> JobStatus {
        let ProgressSnapshot {
            scanned,
            events,
            publish_failures,
            read_errors,
        } = self.progress.snapshot();
        let outcome = self.outcome.lock().clone();
        JobStatus {
            mode: self.mode,
            direction: self.direction,
            state: outcome.as_ref().map_or(JobState::Running, |o| o.state),
            scanned,
            events,
            read_errors,
            publish_failures,
            started_at: self.started_at,
            finished_at: outcome.as_ref().map(|o| o.finished_at),
            error: outcome.and_then(|o| o.error),
        }
    }

    fn is_running(&self) -> bool {
        self.outcome.lock().is_none()
    }

    /// Cancel and wait for the thread; records a panic as a failure
    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                *self.outcome.lock() = Some(JobOutcome {
                    state: JobState::Failed,
                    finished_at: Timestamp::now(),
                    error: Some("validation thread panicked".to_string()),
                });
            }
        }
    }
}

/// Control plane of one migration
pub struct Scheduler<T: Entity> {
    name: String,
    pool: Arc<DoubleWritePool<T>>,
    producer: Arc<dyn Producer>,
    config: ValidatorConfig,
    root: CancelToken,
    /// Serializes start/stop so a replaced job is joined before its successor starts
    control: Mutex<()>,
    jobs: Mutex<BTreeMap<ValidationMode, JobRecord>>,
}

impl<T: Entity> Scheduler<T> {
    /// Control `pool`, publishing inconsistencies through `producer`
    pub fn new(
        name: impl Into<String>,
        pool: Arc<DoubleWritePool<T>>,
        producer: Arc<dyn Producer>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            pool,
            producer,
            config,
            root: CancelToken::new(),
            control: Mutex::new(()),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    /// The connector this scheduler drives
    pub fn pool(&self) -> &Arc<DoubleWritePool<T>> {
        &self.pool
    }

    /// Validator defaults
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Switch pattern by name
    pub fn update_pattern(&self, pattern: &str) -> Result<MigrationPattern> {
        self.pool.update_pattern(pattern)
    }

    /// Active pattern
    pub fn pattern(&self) -> MigrationPattern {
        self.pool.pattern()
    }

    /// Start a one-pass validation, replacing a running full job
    pub fn start_full_validation(&self, params: ValidationParams) -> Result<JobStatus> {
        self.start(ValidationMode::Full, params)
    }

    /// Start a never-ending incremental validation, replacing a running one
    pub fn start_incr_validation(&self, params: ValidationParams) -> Result<JobStatus> {
        self.start(ValidationMode::Incremental, params)
    }

    fn build_validator(&self, mode: ValidationMode, params: &ValidationParams) -> Result<Validator<T>> {
        let batch_size = params.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(Error::InvalidOperation(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let base = Arc::clone(self.pool.store(params.direction.base()));
        let target = Arc::clone(self.pool.store(params.direction.target()));
        let validator = Validator::new(base, target, params.direction, Arc::clone(&self.producer))
            .batch_size(batch_size)
            .read_timeout(self.config.read_timeout())
            .notify_timeout(self.config.notify_timeout());

        Ok(match mode {
            ValidationMode::Full => {
                if let Some(sleep_ms) = params.sleep_interval_ms.filter(|ms| *ms > 0) {
                    return Err(Error::InvalidOperation(format!(
                        "full validation is a single pass, sleep_interval_ms {} not allowed",
                        sleep_ms
                    )));
                }
                validator.full().sleep_interval(Duration::ZERO)
            }
            ValidationMode::Incremental => {
                let configured = if self.config.sleep_interval_ms > 0 {
                    self.config.sleep_interval_ms
                } else {
                    DEFAULT_INCREMENTAL_SLEEP_MS
                };
                let sleep_ms = params.sleep_interval_ms.unwrap_or(configured);
                if sleep_ms == 0 {
                    return Err(Error::InvalidOperation(
                        "incremental validation needs a positive sleep_interval_ms".to_string(),
                    ));
                }
                validator
                    .incremental(params.since.unwrap_or_else(Timestamp::now))
                    .sleep_interval(Duration::from_millis(sleep_ms))
            }
        })
    }

    fn start(&self, mode: ValidationMode, params: ValidationParams) -> Result<JobStatus> {
        let validator = self.build_validator(mode, &params)?;
        let _control = self.control.lock();

        if self.root.is_cancelled() {
            return Err(Error::InvalidOperation(format!(
                "migration {} is shut down",
                self.name
            )));
        }

        let previous = self.jobs.lock().remove(&mode);
        if let Some(mut previous) = previous {
            if previous.is_running() {
                info!(migration = %self.name, mode = %mode, "replacing running validation");
            }
            previous.stop();
        }

        let cancel = self.root.child();
        let progress = Arc::clone(validator.progress());
        let outcome: Arc<Mutex<Option<JobOutcome>>> = Arc::new(Mutex::new(None));

        let handle = {
            let cancel = cancel.clone();
            let outcome = Arc::clone(&outcome);
            let name = self.name.clone();
            std::thread::Builder::new()
                .name(format!("dualwrite-validate-{}", mode))
                .spawn(move || {
                    let (state, error) = match validator.validate(&cancel) {
                        Ok(()) if cancel.is_cancelled() => (JobState::Cancelled, None),
                        Ok(()) => (JobState::Completed, None),
                        Err(e) => {
                            error!(migration = %name, mode = %mode, error = %e, "validation failed");
                            (JobState::Failed, Some(e.to_string()))
                        }
                    };
                    *outcome.lock() = Some(JobOutcome {
                        state,
                        finished_at: Timestamp::now(),
                        error,
                    });
                })
                .map_err(Error::IoError)?
        };

        let record = JobRecord {
            mode,
            direction: params.direction,
            started_at: Timestamp::now(),
            progress,
            outcome,
            cancel,
            handle: Some(handle),
        };
        let status = record.status();
        self.jobs.lock().insert(mode, record);

        info!(
            migration = %self.name,
            mode = %mode,
            direction = params.direction.as_str(),
            "validation job started"
        );
        Ok(status)
    }

    /// Stop the job of `mode` and wait for it; returns whether it was running
    pub fn stop_validation(&self, mode: ValidationMode) -> Result<bool> {
        let _control = self.control.lock();
        let (was_running, record) = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(&mode) {
                Some(record) => (record.is_running(), record.handle.take().map(|h| (record.cancel.clone(), h))),
                None => return Ok(false),
            }
        };

        if let Some((cancel, handle)) = record {
            cancel.cancel();
            if handle.join().is_err() {
                warn!(migration = %self.name, mode = %mode, "validation thread panicked");
                if let Some(record) = self.jobs.lock().get(&mode) {
                    *record.outcome.lock() = Some(JobOutcome {
                        state: JobState::Failed,
                        finished_at: Timestamp::now(),
                        error: Some("validation thread panicked".to_string()),
                    });
                }
            }
        }

        if was_running {
            info!(migration = %self.name, mode = %mode, "validation job stopped");
        }
        Ok(was_running)
    }

    /// Latest job of `mode`, if one was ever started
    pub fn job_status(&self, mode: ValidationMode) -> Option<JobStatus> {
        self.jobs.lock().get(&mode).map(JobRecord::status)
    }

    /// Pattern, jobs and connector counters
    pub fn status(&self) -> MigrationStatus {
        let stats = self.pool.stats();
        MigrationStatus {
            name: self.name.clone(),
            pattern: self.pool.pattern(),
            jobs: self.jobs.lock().values().map(JobRecord::status).collect(),
            secondary_failures: stats.secondary_failures,
            secondary_dropped: stats.secondary_dropped,
            shadow_mismatches: stats.shadow_mismatches,
            fixer: None,
        }
    }

    /// Whether [`Scheduler::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every job, wait for them, and drain best-effort writes.
    ///
    /// Later start requests fail. Safe to call more than once.
    pub fn shutdown(&self) {
        let _control = self.control.lock();
        self.root.cancel();
        let mut records: Vec<JobRecord> = {
            let mut jobs = self.jobs.lock();
            let taken = std::mem::take(&mut *jobs);
            taken.into_values().collect()
        };
        for record in &mut records {
            record.stop();
        }
        // Keep finished jobs visible to status()
        {
            let mut jobs = self.jobs.lock();
            for record in records {
                jobs.insert(record.mode, record);
            }
        }
        self.pool.flush();
        info!(migration = %self.name, "scheduler shut down");
    }
}

impl<T: Entity> ControlPlane for Scheduler<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_pattern(&self, pattern: &str) -> Result<MigrationPattern> {
        Scheduler::update_pattern(self, pattern)
    }

    fn pattern(&self) -> MigrationPattern {
        Scheduler::pattern(self)
    }

    fn start_validation(&self, mode: ValidationMode, params: ValidationParams) -> Result<JobStatus> {
        self.start(mode, params)
    }

    fn stop_validation(&self, mode: ValidationMode) -> Result<bool> {
        Scheduler::stop_validation(self, mode)
    }

    fn status(&self) -> MigrationStatus {
        Scheduler::status(self)
    }

    fn shutdown(&self) -> Result<()> {
        Scheduler::shutdown(self);
        Ok(())
    }
}

impl<T: Entity> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.root.cancel();
        for record in self.jobs.get_mut().values_mut() {
            record.stop();
        }
    }
}

//! Consistency validation between a base and a target store
//!
//! A [`Validator`] checks two things concurrently:
//!
//! - **forward**: every base row exists in the target and `compare_to`s equal
//!   (reports `TargetMissing` / `NotEqual`)
//! - **mirror**: every target row exists in the base (reports `BaseMissing`)
//!
//! Both legs scan in batches. The forward leg walks the base either by id
//! (full) or by update time past a watermark (incremental); the mirror leg
//! always walks the target by id and only checks existence.
//!
//! With a zero sleep interval the validator makes one pass and returns. With
//! a positive interval it sleeps whenever a scan is exhausted and then keeps
//! polling from where it stopped, until cancelled.
//!
//! Reads that fail are logged and skipped; a cancellation or deadline during
//! a read ends the leg cleanly. Every divergence is published as an
//! [`InconsistencyEvent`] carrying the validator's direction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dualwrite_core::{
    CancelToken, Direction, Entity, Error, InconsistencyEvent, InconsistencyType, OpContext, Result,
    Timestamp,
};
use dualwrite_events::Producer;
use dualwrite_storage::{Query, Row, RowStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Which rows the forward leg visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Every base row, ordered by id
    Full,
    /// Base rows updated after the watermark, ordered by update time
    Incremental {
        /// Exclusive lower bound on `updated_at`
        since: Timestamp,
    },
}

/// Live counters of a validation run
#[derive(Debug, Default)]
pub struct ValidationProgress {
    scanned: AtomicU64,
    events: AtomicU64,
    publish_failures: AtomicU64,
    read_errors: AtomicU64,
}

/// Point-in-time copy of [`ValidationProgress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Rows read from the scanned side, both legs
    pub scanned: u64,
    /// Inconsistency events published
    pub events: u64,
    /// Events that could not be published
    pub publish_failures: u64,
    /// Reads that failed and were skipped
    pub read_errors: u64,
}

impl ValidationProgress {
    /// Fresh zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            scanned: self.scanned.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

/// Which side a leg scans, and what it reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Forward,
    Mirror,
}

impl Leg {
    fn as_str(&self) -> &'static str {
        match self {
            Leg::Forward => "forward",
            Leg::Mirror => "mirror",
        }
    }
}

/// Scan position of one leg
#[derive(Debug, Clone, Copy)]
enum Cursor {
    ById { offset: usize },
    Since { since: Timestamp, offset: usize },
}

impl Cursor {
    fn query(&self, limit: usize) -> Query {
        match *self {
            Cursor::ById { offset } => Query::OrderedById { offset, limit },
            Cursor::Since { since, offset } => Query::UpdatedSince {
                since,
                offset,
                limit,
            },
        }
    }

    /// Move past rows that were checked
    fn advance<T: Entity>(&mut self, rows: &[Row<T>]) {
        match self {
            Cursor::ById { offset } => *offset += rows.len(),
            Cursor::Since { since, offset } => {
                if let Some(last) = rows.last() {
                    *since = last.updated_at;
                    *offset = 0;
                }
            }
        }
    }

    /// Move past rows that could not be read
    fn skip(&mut self, n: usize) {
        match self {
            Cursor::ById { offset } | Cursor::Since { offset, .. } => *offset += n,
        }
    }
}

/// Checks a base store against a target store and publishes divergences
pub struct Validator<T: Entity> {
    base: Arc<dyn RowStore<T>>,
    target: Arc<dyn RowStore<T>>,
    direction: Direction,
    producer: Arc<dyn Producer>,
    mode: ScanMode,
    batch_size: usize,
    sleep_interval: Duration,
    read_timeout: Duration,
    notify_timeout: Duration,
    progress: Arc<ValidationProgress>,
}

impl<T: Entity> Validator<T> {
    /// Validator for `base` → `target`, reporting with `direction`.
    ///
    /// Defaults: full scan, batch of 100, no sleep (one pass), 1s read
    /// deadline, 5s publish deadline.
    pub fn new(
        base: Arc<dyn RowStore<T>>,
        target: Arc<dyn RowStore<T>>,
        direction: Direction,
        producer: Arc<dyn Producer>,
    ) -> Self {
        Self {
            base,
            target,
            direction,
            producer,
            mode: ScanMode::Full,
            batch_size: 100,
            sleep_interval: Duration::ZERO,
            read_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(5),
            progress: Arc::new(ValidationProgress::new()),
        }
    }

    /// Scan every base row by id
    pub fn full(mut self) -> Self {
        self.mode = ScanMode::Full;
        self
    }

    /// Scan base rows updated after `since`
    pub fn incremental(mut self, since: Timestamp) -> Self {
        self.mode = ScanMode::Incremental { since };
        self
    }

    /// Rows per read; values below 1 are raised to 1
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between polls once a scan is exhausted. Zero means one pass.
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Deadline for each read
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Deadline for each publish
    pub fn notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Report into shared counters instead of private ones
    pub fn with_progress(mut self, progress: Arc<ValidationProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Direction stamped on every event
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Forward scan mode
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Live counters
    pub fn progress(&self) -> &Arc<ValidationProgress> {
        &self.progress
    }

    /// Run both legs concurrently until they finish or `cancel` fires.
    ///
    /// Read failures never fail the run; the error return is reserved for a
    /// leg that could not run at all.
    pub fn validate(&self, cancel: &CancelToken) -> Result<()> {
        info!(
            direction = self.direction.as_str(),
            base = %self.base.name(),
            target = %self.target.name(),
            mode = ?self.mode,
            batch_size = self.batch_size,
            "validation started"
        );

        let (forward, mirror) = std::thread::scope(|s| {
            let forward = s.spawn(|| self.validate_base_to_target(cancel));
            let mirror = self.validate_target_to_base(cancel);
            (forward.join(), mirror)
        });
        let forward = forward.map_err(|_| {
            Error::InvalidOperation("forward validation thread panicked".to_string())
        })?;
        forward?;
        mirror?;

        let progress = self.progress.snapshot();
        info!(
            direction = self.direction.as_str(),
            scanned = progress.scanned,
            events = progress.events,
            read_errors = progress.read_errors,
            publish_failures = progress.publish_failures,
            cancelled = cancel.is_cancelled(),
            "validation finished"
        );
        Ok(())
    }

    /// Check base rows against the target
    pub fn validate_base_to_target(&self, cancel: &CancelToken) -> Result<()> {
        let cursor = match self.mode {
            ScanMode::Full => Cursor::ById { offset: 0 },
            ScanMode::Incremental { since } => Cursor::Since { since, offset: 0 },
        };
        self.scan(Leg::Forward, cursor, cancel)
    }

    /// Check that every target row still exists in the base
    pub fn validate_target_to_base(&self, cancel: &CancelToken) -> Result<()> {
        self.scan(Leg::Mirror, Cursor::ById { offset: 0 }, cancel)
    }

    fn scan(&self, leg: Leg, mut cursor: Cursor, cancel: &CancelToken) -> Result<()> {
        let (scanned, other) = match leg {
            Leg::Forward => (&self.base, &self.target),
            Leg::Mirror => (&self.target, &self.base),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let ctx = OpContext::with_cancel(cancel).with_timeout(self.read_timeout);
            let rows = match scanned.query(&ctx, &cursor.query(self.batch_size)) {
                Ok(rows) => rows,
                Err(e) if e.is_cancellation() => {
                    debug!(leg = leg.as_str(), store = %scanned.name(), error = %e, "scan interrupted");
                    return Ok(());
                }
                Err(e) => {
                    self.progress.read_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        leg = leg.as_str(),
                        store = %scanned.name(),
                        cursor = ?cursor,
                        error = %e,
                        "scan read failed, skipping batch"
                    );
                    cursor.skip(self.batch_size);
                    continue;
                }
            };

            if rows.is_empty() {
                if !self.idle(cancel) {
                    return Ok(());
                }
                continue;
            }

            self.progress
                .scanned
                .fetch_add(rows.len() as u64, Ordering::Relaxed);
            if !self.check_batch(leg, &rows, other.as_ref(), cancel) {
                return Ok(());
            }
            cursor.advance(&rows);
            debug!(leg = leg.as_str(), rows = rows.len(), cursor = ?cursor, "batch checked");

            if rows.len() < self.batch_size && !self.idle(cancel) {
                return Ok(());
            }
        }
    }

    /// Look the batch up on the other side and report divergences.
    ///
    /// Returns `false` when the leg should stop.
    fn check_batch(&self, leg: Leg, rows: &[Row<T>], other: &dyn RowStore<T>, cancel: &CancelToken) -> bool {
        let ids: Vec<i64> = rows.iter().map(|r| r.id()).collect();
        let ctx = OpContext::with_cancel(cancel).with_timeout(self.read_timeout);
        let found: HashMap<i64, T> = match other.query(&ctx, &Query::Ids(ids)) {
            Ok(found) => found.into_iter().map(|r| (r.id(), r.value)).collect(),
            Err(e) if e.is_cancellation() => {
                debug!(leg = leg.as_str(), store = %other.name(), error = %e, "lookup interrupted");
                return false;
            }
            Err(e) => {
                self.progress.read_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    leg = leg.as_str(),
                    store = %other.name(),
                    first_id = rows[0].id(),
                    error = %e,
                    "lookup failed, batch left unchecked"
                );
                return true;
            }
        };

        for row in rows {
            let kind = match (leg, found.get(&row.id())) {
                (Leg::Forward, None) => InconsistencyType::TargetMissing,
                (Leg::Forward, Some(other)) if !row.value.compare_to(other) => {
                    InconsistencyType::NotEqual
                }
                (Leg::Mirror, None) => InconsistencyType::BaseMissing,
                _ => continue,
            };
            self.notify(row.id(), kind);
        }
        true
    }

    fn notify(&self, id: i64, kind: InconsistencyType) {
        let event = InconsistencyEvent::new(id, self.direction, kind);
        let ctx = OpContext::detached(self.notify_timeout);
        match self.producer.produce_inconsistent_event(&ctx, &event) {
            Ok(()) => {
                self.progress.events.fetch_add(1, Ordering::Relaxed);
                debug!(id, direction = self.direction.as_str(), kind = kind.as_str(), "inconsistency reported");
            }
            Err(e) => {
                self.progress.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    id,
                    direction = self.direction.as_str(),
                    kind = kind.as_str(),
                    error = %e,
                    "failed to publish inconsistency event"
                );
            }
        }
    }

    /// Wait before polling again. Returns `false` when the leg is done.
    fn idle(&self, cancel: &CancelToken) -> bool {
        if self.sleep_interval.is_zero() {
            return false;
        }
        cancel.sleep(self.sleep_interval)
    }
}

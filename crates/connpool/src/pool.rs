//! The dual-write connection pool
//!
//! `DoubleWritePool` wraps a source and a destination store behind the same
//! [`RowStore`] interface business code already uses. Each call loads the
//! migration pattern exactly once and routes on it:
//!
//! | pattern     | writes                         | reads       |
//! |-------------|--------------------------------|-------------|
//! | `src_only`  | src                            | src         |
//! | `src_first` | src, then dst best-effort      | src         |
//! | `dst_first` | dst, then src best-effort      | dst         |
//! | `dst_only`  | dst                            | dst         |
//!
//! The authoritative store's result is what the caller sees. Best-effort
//! writes and shadow reads run on the [`Mirror`] with their own deadline and
//! are only ever logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dualwrite_core::{Entity, MigrationPattern, OpContext, PatternCell, Result, Side};
use dualwrite_storage::{ExecResult, Query, Row, RowStore, Statement, StoreTx, TxOptions};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::mirror::{Mirror, MirrorStats};
use crate::tx::{DoubleWriteTx, SecondaryLeg};

/// Best-effort path counters shared with open transactions
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) secondary_failures: AtomicU64,
    pub(crate) secondary_dropped: AtomicU64,
    pub(crate) shadow_mismatches: AtomicU64,
}

/// Connector metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Secondary exec/begin/commit/rollback calls that failed
    pub secondary_failures: u64,
    /// Secondary writes dropped because the mirror queue was full
    pub secondary_dropped: u64,
    /// Shadow reads that disagreed with the authoritative store
    pub shadow_mismatches: u64,
    /// Mirror worker state
    pub mirror: MirrorStats,
}

/// Dual-write proxy over a source and a destination store
pub struct DoubleWritePool<T: Entity> {
    name: String,
    src: Arc<dyn RowStore<T>>,
    dst: Arc<dyn RowStore<T>>,
    pattern: Arc<PatternCell>,
    config: PoolConfig,
    mirror: Mirror,
    counters: Arc<PoolCounters>,
}

impl<T: Entity> DoubleWritePool<T> {
    /// Create a pool routing by `pattern`.
    ///
    /// The pattern cell is shared with whoever flips it (normally the
    /// scheduler); each migration gets its own cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror thread cannot be spawned.
    pub fn new(
        src: Arc<dyn RowStore<T>>,
        dst: Arc<dyn RowStore<T>>,
        pattern: Arc<PatternCell>,
        config: PoolConfig,
    ) -> Result<Self> {
        let name = format!("{}+{}", src.name(), dst.name());
        let mirror = Mirror::new(&name, config.mirror_queue_depth)?;
        Ok(Self {
            name,
            src,
            dst,
            pattern,
            config,
            mirror,
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Switch to the pattern named `pattern`.
    ///
    /// Fails with `UnknownPattern` and leaves the active pattern unchanged
    /// for anything other than the four legal names.
    pub fn update_pattern(&self, pattern: &str) -> Result<MigrationPattern> {
        let previous = self.pattern.load();
        let next = self.pattern.store_str(pattern).map_err(|e| {
            warn!(pool = %self.name, requested = pattern, "rejected unknown migration pattern");
            e
        })?;
        info!(pool = %self.name, from = %previous, to = %next, "migration pattern updated");
        Ok(next)
    }

    /// Switch to `pattern`
    pub fn set_pattern(&self, pattern: MigrationPattern) {
        let previous = self.pattern.load();
        self.pattern.store(pattern);
        info!(pool = %self.name, from = %previous, to = %pattern, "migration pattern updated");
    }

    /// Active pattern
    pub fn pattern(&self) -> MigrationPattern {
        self.pattern.load()
    }

    /// The shared pattern cell
    pub fn pattern_cell(&self) -> &Arc<PatternCell> {
        &self.pattern
    }

    /// The store on `side`
    pub fn store(&self, side: Side) -> &Arc<dyn RowStore<T>> {
        match side {
            Side::Src => &self.src,
            Side::Dst => &self.dst,
        }
    }

    /// Settings the pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Open a transaction as a concrete [`DoubleWriteTx`].
    ///
    /// The authoritative leg must open; the secondary leg is best-effort.
    pub fn begin(&self, ctx: &OpContext, opts: TxOptions) -> Result<DoubleWriteTx<T>> {
        let pattern = self.pattern.load();
        let primary_store = self.store(pattern.authoritative());
        let primary = primary_store.begin_tx(ctx, opts)?;

        let secondary = pattern.secondary().and_then(|side| {
            let store = self.store(side);
            let sctx = OpContext::detached(self.config.secondary_timeout());
            match store.begin_tx(&sctx, opts) {
                Ok(tx) => Some(SecondaryLeg {
                    store: store.name().to_string(),
                    tx,
                }),
                Err(e) => {
                    self.counters.secondary_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        store = %store.name(),
                        pattern = %pattern,
                        error = %e,
                        "secondary begin failed, continuing with authoritative leg only"
                    );
                    None
                }
            }
        });

        Ok(DoubleWriteTx::new(
            pattern,
            primary_store.name().to_string(),
            primary,
            secondary,
            self.config.secondary_timeout(),
            Arc::clone(&self.counters),
        ))
    }

    /// Block until every queued best-effort job has run
    pub fn flush(&self) {
        self.mirror.flush();
    }

    /// Run queued best-effort jobs and stop the mirror.
    ///
    /// Later best-effort work is dropped and counted.
    pub fn shutdown(&self) {
        self.mirror.shutdown();
    }

    /// Return a snapshot of connector metrics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            secondary_failures: self.counters.secondary_failures.load(Ordering::Relaxed),
            secondary_dropped: self.counters.secondary_dropped.load(Ordering::Relaxed),
            shadow_mismatches: self.counters.shadow_mismatches.load(Ordering::Relaxed),
            mirror: self.mirror.stats(),
        }
    }

    fn mirror_exec(&self, side: Side, stmt: &Statement<T>) {
        let store = Arc::clone(self.store(side));
        let counters = Arc::clone(&self.counters);
        let timeout = self.config.secondary_timeout();
        let job_stmt = stmt.clone();

        let submitted = self.mirror.submit(move || {
            let ctx = OpContext::detached(timeout);
            if let Err(e) = store.exec(&ctx, &job_stmt) {
                counters.secondary_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    store = %store.name(),
                    kind = job_stmt.kind(),
                    id = job_stmt.row_id(),
                    error = %e,
                    "secondary exec failed"
                );
            }
        });

        if let Err(e) = submitted {
            self.counters.secondary_dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                store = %self.store(side).name(),
                kind = stmt.kind(),
                id = stmt.row_id(),
                error = %e,
                "secondary exec dropped"
            );
        }
    }

    fn shadow_rows(&self, rows: &[Row<T>]) {
        if rows.is_empty() {
            return;
        }
        let store = Arc::clone(&self.dst);
        let counters = Arc::clone(&self.counters);
        let timeout = self.config.secondary_timeout();
        let expected: Vec<Row<T>> = rows.to_vec();

        self.submit_shadow(move || {
            let ids: Vec<i64> = expected.iter().map(|r| r.id()).collect();
            let ctx = OpContext::detached(timeout);
            let actual = match store.query(&ctx, &Query::Ids(ids)) {
                Ok(rows) => rows,
                Err(e) => {
                    debug!(store = %store.name(), error = %e, "shadow read failed");
                    return;
                }
            };
            let actual: HashMap<i64, T> = actual.into_iter().map(|r| (r.id(), r.value)).collect();
            for row in &expected {
                compare_shadow(store.name(), &counters, row.id(), Some(&row.value), actual.get(&row.id()));
            }
        });
    }

    fn shadow_row(&self, id: i64, expected: Option<&Row<T>>) {
        let store = Arc::clone(&self.dst);
        let counters = Arc::clone(&self.counters);
        let timeout = self.config.secondary_timeout();
        let expected = expected.map(|r| r.value.clone());

        self.submit_shadow(move || {
            let ctx = OpContext::detached(timeout);
            match store.query_row(&ctx, id) {
                Ok(actual) => compare_shadow(
                    store.name(),
                    &counters,
                    id,
                    expected.as_ref(),
                    actual.as_ref().map(|r| &r.value),
                ),
                Err(e) => debug!(store = %store.name(), id, error = %e, "shadow read failed"),
            }
        });
    }

    fn submit_shadow(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(e) = self.mirror.submit(job) {
            debug!(pool = %self.name, error = %e, "shadow read skipped");
        }
    }

    fn wants_shadow(&self, pattern: MigrationPattern) -> bool {
        self.config.shadow_reads && pattern.shadows_reads()
    }
}

fn compare_shadow<T: Entity>(
    store: &str,
    counters: &PoolCounters,
    id: i64,
    expected: Option<&T>,
    actual: Option<&T>,
) {
    let verdict = match (expected, actual) {
        (None, None) => return,
        (Some(e), Some(a)) if e.compare_to(a) => return,
        (Some(_), Some(_)) => "not equal",
        (Some(_), None) => "missing",
        (None, Some(_)) => "unexpected",
    };
    counters.shadow_mismatches.fetch_add(1, Ordering::Relaxed);
    warn!(store = %store, id, verdict, "shadow read diverged");
}

impl<T: Entity> RowStore<T> for DoubleWritePool<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn exec(&self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        let pattern = self.pattern.load();
        let result = self.store(pattern.authoritative()).exec(ctx, stmt)?;
        if let Some(side) = pattern.secondary() {
            self.mirror_exec(side, stmt);
        }
        Ok(result)
    }

    fn query(&self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        let pattern = self.pattern.load();
        let rows = self.store(pattern.authoritative()).query(ctx, query)?;
        if self.wants_shadow(pattern) {
            self.shadow_rows(&rows);
        }
        Ok(rows)
    }

    fn query_row(&self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        let pattern = self.pattern.load();
        let row = self.store(pattern.authoritative()).query_row(ctx, id)?;
        if self.wants_shadow(pattern) {
            self.shadow_row(id, row.as_ref());
        }
        Ok(row)
    }

    fn begin_tx(&self, ctx: &OpContext, opts: TxOptions) -> Result<Box<dyn StoreTx<T>>> {
        Ok(Box::new(self.begin(ctx, opts)?))
    }
}

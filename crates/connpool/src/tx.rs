//! Dual-write transactions
//!
//! A `DoubleWriteTx` holds the authoritative store's transaction and, when
//! the pattern has a secondary store and its `begin` succeeded, a second
//! transaction on the other store. The pattern is fixed when the transaction
//! begins.
//!
//! The secondary leg runs inline on the caller's thread under the
//! secondary deadline. Once any secondary call fails the leg is rolled back
//! and abandoned; the authoritative leg carries on alone.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dualwrite_core::{Entity, Error, MigrationPattern, OpContext, Result};
use dualwrite_storage::{ExecResult, Query, Row, Statement, StoreTx};
use tracing::{error, warn};

use crate::pool::PoolCounters;

pub(crate) struct SecondaryLeg<T: Entity> {
    pub(crate) store: String,
    pub(crate) tx: Box<dyn StoreTx<T>>,
}

/// Transaction spanning the authoritative store and, best-effort, the other one
pub struct DoubleWriteTx<T: Entity> {
    pattern: MigrationPattern,
    primary_store: String,
    primary: Box<dyn StoreTx<T>>,
    secondary: Option<SecondaryLeg<T>>,
    secondary_timeout: Duration,
    counters: Arc<PoolCounters>,
}

impl<T: Entity> DoubleWriteTx<T> {
    pub(crate) fn new(
        pattern: MigrationPattern,
        primary_store: String,
        primary: Box<dyn StoreTx<T>>,
        secondary: Option<SecondaryLeg<T>>,
        secondary_timeout: Duration,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            pattern,
            primary_store,
            primary,
            secondary,
            secondary_timeout,
            counters,
        }
    }

    /// Pattern the transaction was opened under
    pub fn pattern(&self) -> MigrationPattern {
        self.pattern
    }

    /// Name of the store whose outcome the caller sees
    pub fn primary_store(&self) -> &str {
        &self.primary_store
    }

    /// Whether the secondary leg is still open
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    fn secondary_exec(&mut self, stmt: &Statement<T>) {
        let ctx = OpContext::detached(self.secondary_timeout);
        let failed = match self.secondary.as_mut() {
            None => return,
            Some(leg) => leg.tx.exec(&ctx, stmt).err(),
        };
        if let Some(e) = failed {
            self.abandon_secondary(stmt, &e);
        }
    }

    fn abandon_secondary(&mut self, stmt: &Statement<T>, cause: &Error) {
        let Some(leg) = self.secondary.take() else {
            return;
        };
        self.counters.secondary_failures.fetch_add(1, Ordering::Relaxed);
        error!(
            store = %leg.store,
            kind = stmt.kind(),
            id = stmt.row_id(),
            error = %cause,
            "secondary exec failed in transaction, abandoning secondary leg"
        );
        if let Err(e) = leg.tx.rollback() {
            warn!(store = %leg.store, error = %e, "secondary rollback after failure failed");
        }
    }

    fn finish_secondary(
        leg: Option<SecondaryLeg<T>>,
        counters: &PoolCounters,
        action: &'static str,
        finish: impl FnOnce(Box<dyn StoreTx<T>>) -> Result<()>,
    ) {
        let Some(leg) = leg else {
            return;
        };
        if let Err(e) = finish(leg.tx) {
            counters.secondary_failures.fetch_add(1, Ordering::Relaxed);
            error!(store = %leg.store, action, error = %e, "secondary transaction end failed");
        }
    }
}

impl<T: Entity> StoreTx<T> for DoubleWriteTx<T> {
    fn exec(&mut self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        let result = self.primary.exec(ctx, stmt)?;
        self.secondary_exec(stmt);
        Ok(result)
    }

    fn query(&mut self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        self.primary.query(ctx, query)
    }

    fn query_row(&mut self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        self.primary.query_row(ctx, id)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let DoubleWriteTx {
            primary,
            secondary,
            counters,
            ..
        } = *self;
        // On failure the secondary handle is dropped unfinished
        primary.commit()?;
        Self::finish_secondary(secondary, &counters, "commit", |tx| tx.commit());
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let DoubleWriteTx {
            primary,
            secondary,
            counters,
            ..
        } = *self;
        primary.rollback()?;
        Self::finish_secondary(secondary, &counters, "rollback", |tx| tx.rollback());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DoubleWritePool, PoolConfig};
    use dualwrite_core::PatternCell;
    use dualwrite_storage::testing::{FaultPoint, FaultyStore, Interaction};
    use dualwrite_storage::{MemoryStore, RowStore, TxOptions};

    struct Fixture {
        src: Arc<MemoryStore<Interaction>>,
        dst: Arc<MemoryStore<Interaction>>,
        faulty_src: Arc<FaultyStore<Interaction>>,
        faulty_dst: Arc<FaultyStore<Interaction>>,
        pool: DoubleWritePool<Interaction>,
    }

    fn fixture(pattern: MigrationPattern) -> Fixture {
        let src = Arc::new(MemoryStore::new("src"));
        let dst = Arc::new(MemoryStore::new("dst"));
        let faulty_src = Arc::new(FaultyStore::new(src.clone()));
        let faulty_dst = Arc::new(FaultyStore::new(dst.clone()));
        let pool = DoubleWritePool::new(
            faulty_src.clone(),
            faulty_dst.clone(),
            Arc::new(PatternCell::new(pattern)),
            PoolConfig::default(),
        )
        .unwrap();
        Fixture {
            src,
            dst,
            faulty_src,
            faulty_dst,
            pool,
        }
    }

    fn ctx() -> OpContext {
        OpContext::background()
    }

    fn upsert(id: i64) -> Statement<Interaction> {
        Statement::Upsert(Interaction::new(id, id))
    }

    #[test]
    fn test_commit_both_legs() {
        let f = fixture(MigrationPattern::SrcFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        assert!(tx.has_secondary());
        assert_eq!(tx.primary_store(), "src");
        tx.exec(&ctx(), &upsert(1)).unwrap();
        tx.exec(&ctx(), &upsert(2)).unwrap();
        Box::new(tx).commit().unwrap();

        assert_eq!(f.src.len(), 2);
        assert_eq!(f.dst.len(), 2);
    }

    #[test]
    fn test_single_leg_patterns() {
        for pattern in [MigrationPattern::SrcOnly, MigrationPattern::DstOnly] {
            let f = fixture(pattern);
            let tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
            assert!(!tx.has_secondary(), "pattern {}", pattern);
        }
    }

    #[test]
    fn test_rollback_both_legs() {
        let f = fixture(MigrationPattern::DstFirst);
        let mut tx = f.pool.begin_tx(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &upsert(1)).unwrap();
        tx.rollback().unwrap();
        assert!(f.src.is_empty());
        assert!(f.dst.is_empty());
    }

    #[test]
    fn test_secondary_begin_failure_proceeds_with_primary() {
        let f = fixture(MigrationPattern::SrcFirst);
        f.faulty_dst.fail(FaultPoint::Begin);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        assert!(!tx.has_secondary());
        tx.exec(&ctx(), &upsert(1)).unwrap();
        Box::new(tx).commit().unwrap();
        assert_eq!(f.src.len(), 1);
        assert!(f.dst.is_empty());
        assert_eq!(f.pool.stats().secondary_failures, 1);
    }

    #[test]
    fn test_primary_begin_failure_fails() {
        let f = fixture(MigrationPattern::SrcFirst);
        f.faulty_src.fail(FaultPoint::Begin);
        assert!(f.pool.begin_tx(&ctx(), TxOptions::default()).is_err());
        assert_eq!(f.faulty_dst.calls(FaultPoint::Begin), 0);
    }

    #[test]
    fn test_secondary_exec_failure_abandons_leg() {
        let f = fixture(MigrationPattern::SrcFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &upsert(1)).unwrap();

        f.faulty_dst.fail_times(FaultPoint::Exec, 1);
        tx.exec(&ctx(), &upsert(2)).unwrap();
        assert!(!tx.has_secondary());

        tx.exec(&ctx(), &upsert(3)).unwrap();
        Box::new(tx).commit().unwrap();

        assert_eq!(f.src.len(), 3);
        // The abandoned leg was rolled back, including the write that succeeded
        assert!(f.dst.is_empty());
        assert_eq!(f.faulty_dst.calls(FaultPoint::Exec), 2);
    }

    #[test]
    fn test_primary_exec_failure_surfaces() {
        let f = fixture(MigrationPattern::DstFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        f.faulty_dst.fail(FaultPoint::Exec);
        assert!(tx.exec(&ctx(), &upsert(1)).is_err());
        assert_eq!(f.faulty_src.calls(FaultPoint::Exec), 0);
    }

    #[test]
    fn test_primary_commit_failure_skips_secondary() {
        let f = fixture(MigrationPattern::SrcFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &upsert(1)).unwrap();
        f.faulty_src.fail(FaultPoint::Commit);
        assert!(Box::new(tx).commit().is_err());
        assert!(f.src.is_empty());
        assert!(f.dst.is_empty());
        assert_eq!(f.faulty_dst.calls(FaultPoint::Commit), 0);
    }

    #[test]
    fn test_secondary_commit_failure_is_invisible() {
        let f = fixture(MigrationPattern::SrcFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &upsert(1)).unwrap();
        f.faulty_dst.fail(FaultPoint::Commit);
        Box::new(tx).commit().unwrap();
        assert_eq!(f.src.len(), 1);
        assert!(f.dst.is_empty());
        assert_eq!(f.pool.stats().secondary_failures, 1);
    }

    #[test]
    fn test_pattern_fixed_at_begin() {
        let f = fixture(MigrationPattern::SrcFirst);
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        f.pool.set_pattern(MigrationPattern::DstOnly);
        tx.exec(&ctx(), &upsert(1)).unwrap();
        assert_eq!(tx.pattern(), MigrationPattern::SrcFirst);
        Box::new(tx).commit().unwrap();
        assert_eq!(f.src.len(), 1);
        assert_eq!(f.dst.len(), 1);
    }

    #[test]
    fn test_reads_inside_tx_use_primary() {
        let f = fixture(MigrationPattern::DstFirst);
        f.src.exec(&ctx(), &upsert(1)).unwrap();
        let mut tx = f.pool.begin(&ctx(), TxOptions::default()).unwrap();
        assert!(tx.query_row(&ctx(), 1).unwrap().is_none());
        tx.exec(&ctx(), &upsert(2)).unwrap();
        let rows = tx
            .query(&ctx(), &Query::OrderedById { offset: 0, limit: 10 })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), 2);
    }
}

//! Fault injection for row stores
//!
//! `FaultyStore` forwards every call to an inner store unless a fault is
//! armed for that call's [`FaultPoint`]. Faults are either permanent until
//! healed or fire for the next N calls. Rows can also be poisoned by id so
//! that every call touching them fails.
//!
//! Injected failures surface as `Error::Unavailable`. Injected latency
//! honours the caller's `OpContext`, so a slow store trips the caller's
//! deadline the way a stalled network peer would.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dualwrite_core::{Entity, Error, OpContext, Result};
use parking_lot::Mutex;

use crate::traits::{ExecResult, Query, Row, RowStore, Statement, StoreTx, TxOptions};

/// Where a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `RowStore::exec` and `StoreTx::exec`
    Exec,
    /// `RowStore::query` and `StoreTx::query`
    Query,
    /// `RowStore::query_row` and `StoreTx::query_row`
    QueryRow,
    /// `RowStore::begin_tx`
    Begin,
    /// `StoreTx::commit`
    Commit,
    /// `StoreTx::rollback`
    Rollback,
}

impl FaultPoint {
    /// Get all fault points
    pub fn all() -> Vec<FaultPoint> {
        vec![
            FaultPoint::Exec,
            FaultPoint::Query,
            FaultPoint::QueryRow,
            FaultPoint::Begin,
            FaultPoint::Commit,
            FaultPoint::Rollback,
        ]
    }
}

#[derive(Debug, Clone, Copy)]
enum Arming {
    Always,
    Times(usize),
}

#[derive(Debug, Default)]
struct FaultPlan {
    armed: Mutex<HashMap<FaultPoint, Arming>>,
    poisoned: Mutex<HashSet<i64>>,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<HashMap<FaultPoint, u64>>,
}

impl FaultPlan {
    /// Count the call, apply latency, then fire any armed fault
    fn trip(&self, store: &str, point: FaultPoint, ctx: Option<&OpContext>) -> Result<()> {
        *self.calls.lock().entry(point).or_insert(0) += 1;

        if let (Some(ctx), Some(latency)) = (ctx, *self.latency.lock()) {
            ctx.sleep(latency)?;
        }

        let mut armed = self.armed.lock();
        let fire = match armed.get(&point).copied() {
            None => false,
            Some(Arming::Always) => true,
            Some(Arming::Times(left)) => {
                if left <= 1 {
                    armed.remove(&point);
                } else {
                    armed.insert(point, Arming::Times(left - 1));
                }
                true
            }
        };
        if fire {
            return Err(Error::unavailable(store, format!("injected {:?} fault", point)));
        }
        Ok(())
    }

    fn check_row(&self, store: &str, id: i64) -> Result<()> {
        if self.poisoned.lock().contains(&id) {
            return Err(Error::unavailable(store, format!("row {} poisoned", id)));
        }
        Ok(())
    }
}

/// Store wrapper that fails on demand
pub struct FaultyStore<T: Entity> {
    inner: Arc<dyn RowStore<T>>,
    plan: Arc<FaultPlan>,
}

impl<T: Entity> FaultyStore<T> {
    /// Wrap `inner` with no faults armed
    pub fn new(inner: Arc<dyn RowStore<T>>) -> Self {
        Self {
            inner,
            plan: Arc::new(FaultPlan::default()),
        }
    }

    /// Fail every call at `point` until healed
    pub fn fail(&self, point: FaultPoint) {
        self.plan.armed.lock().insert(point, Arming::Always);
    }

    /// Fail the next `times` calls at `point`
    pub fn fail_times(&self, point: FaultPoint, times: usize) {
        if times == 0 {
            return;
        }
        self.plan.armed.lock().insert(point, Arming::Times(times));
    }

    /// Disarm `point`
    pub fn heal(&self, point: FaultPoint) {
        self.plan.armed.lock().remove(&point);
    }

    /// Disarm every fault point and unpoison every row
    pub fn heal_all(&self) {
        self.plan.armed.lock().clear();
        self.plan.poisoned.lock().clear();
    }

    /// Fail every exec and read that touches row `id`
    pub fn poison(&self, id: i64) {
        self.plan.poisoned.lock().insert(id);
    }

    /// Delay every call by `latency` (bounded by the caller's deadline)
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.plan.latency.lock() = latency;
    }

    /// Calls observed at `point`, including failed ones
    pub fn calls(&self, point: FaultPoint) -> u64 {
        self.plan.calls.lock().get(&point).copied().unwrap_or(0)
    }
}

impl<T: Entity> RowStore<T> for FaultyStore<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn exec(&self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        self.plan.trip(self.name(), FaultPoint::Exec, Some(ctx))?;
        self.plan.check_row(self.name(), stmt.row_id())?;
        self.inner.exec(ctx, stmt)
    }

    fn query(&self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        self.plan.trip(self.name(), FaultPoint::Query, Some(ctx))?;
        let rows = self.inner.query(ctx, query)?;
        for row in &rows {
            self.plan.check_row(self.name(), row.id())?;
        }
        Ok(rows)
    }

    fn query_row(&self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        self.plan.trip(self.name(), FaultPoint::QueryRow, Some(ctx))?;
        self.plan.check_row(self.name(), id)?;
        self.inner.query_row(ctx, id)
    }

    fn begin_tx(&self, ctx: &OpContext, opts: TxOptions) -> Result<Box<dyn StoreTx<T>>> {
        self.plan.trip(self.name(), FaultPoint::Begin, Some(ctx))?;
        let inner = self.inner.begin_tx(ctx, opts)?;
        Ok(Box::new(FaultyTx {
            store: self.name().to_string(),
            inner,
            plan: Arc::clone(&self.plan),
        }))
    }
}

struct FaultyTx<T: Entity> {
    store: String,
    inner: Box<dyn StoreTx<T>>,
    plan: Arc<FaultPlan>,
}

impl<T: Entity> StoreTx<T> for FaultyTx<T> {
    fn exec(&mut self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        self.plan.trip(&self.store, FaultPoint::Exec, Some(ctx))?;
        self.plan.check_row(&self.store, stmt.row_id())?;
        self.inner.exec(ctx, stmt)
    }

    fn query(&mut self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        self.plan.trip(&self.store, FaultPoint::Query, Some(ctx))?;
        self.inner.query(ctx, query)
    }

    fn query_row(&mut self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        self.plan.trip(&self.store, FaultPoint::QueryRow, Some(ctx))?;
        self.plan.check_row(&self.store, id)?;
        self.inner.query_row(ctx, id)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        // A failed commit drops the inner handle, which discards its writes
        self.plan.trip(&self.store, FaultPoint::Commit, None)?;
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.plan.trip(&self.store, FaultPoint::Rollback, None)?;
        self.inner.rollback()
    }
}

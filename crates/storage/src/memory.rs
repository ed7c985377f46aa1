//! In-memory row store
//!
//! `MemoryStore` keeps one table of rows in a `BTreeMap` keyed by id, guarded
//! by a single `RwLock`. Ordered id scans fall out of the map order; update
//! time scans sort a filtered copy.
//!
//! Every write stamps the row with a store-assigned `updated_at` drawn from a
//! strictly monotonic clock, so incremental scans never miss a write that
//! landed in the same microsecond as the previous one.
//!
//! Transactions buffer statements and replay them under the write lock at
//! commit. Reads inside a transaction see the committed table overlaid with
//! the transaction's own writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dualwrite_core::{Entity, Error, OpContext, Result, Timestamp};
use parking_lot::RwLock;

use crate::traits::{ExecResult, Query, Row, RowStore, Statement, StoreTx, TxOptions};

type Table<T> = BTreeMap<i64, Row<T>>;

/// Pending effect of a transaction on one id; `None` means deleted
type Overlay<T> = HashMap<i64, Option<Row<T>>>;

/// Strictly increasing microsecond clock
#[derive(Debug, Default)]
struct UpdateClock {
    last: AtomicU64,
}

impl UpdateClock {
    fn next(&self) -> Timestamp {
        let now = Timestamp::now().as_micros();
        let floor = now.saturating_sub(1);
        // Closure never returns None
        let prev = match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(prev.max(floor) + 1)
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        Timestamp::from_micros(prev.max(floor) + 1)
    }
}

/// Thread-safe in-memory table
pub struct MemoryStore<T> {
    name: String,
    data: Arc<RwLock<Table<T>>>,
    clock: Arc<UpdateClock>,
}

impl<T: Entity> MemoryStore<T> {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(RwLock::new(BTreeMap::new())),
            clock: Arc::new(UpdateClock::default()),
        }
    }

    /// Create a store pre-populated with `rows`
    pub fn with_rows(name: impl Into<String>, rows: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new(name);
        {
            let mut data = store.data.write();
            for value in rows {
                let updated_at = store.clock.next();
                data.insert(value.id(), Row { value, updated_at });
            }
        }
        store
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when the table has no rows
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Current value of a row, bypassing contexts and fault injection
    pub fn get(&self, id: i64) -> Option<T> {
        self.data.read().get(&id).map(|row| row.value.clone())
    }

    /// All rows ordered by id
    pub fn snapshot(&self) -> Vec<T> {
        self.data.read().values().map(|row| row.value.clone()).collect()
    }

    /// Highest `updated_at` in the table; `EPOCH` when empty
    pub fn high_watermark(&self) -> Timestamp {
        self.data
            .read()
            .values()
            .map(|row| row.updated_at)
            .max()
            .unwrap_or(Timestamp::EPOCH)
    }
}

impl<T> std::fmt::Debug for MemoryStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("rows", &self.data.read().len())
            .finish()
    }
}

/// Work out the effect of `stmt` against `table` overlaid with `staged`,
/// recording it in `staged`.
fn stage<T: Entity>(
    table: &Table<T>,
    staged: &mut Overlay<T>,
    stmt: &Statement<T>,
    stamp: Timestamp,
) -> Result<ExecResult> {
    let id = stmt.row_id();
    let exists = match staged.get(&id) {
        Some(pending) => pending.is_some(),
        None => table.contains_key(&id),
    };
    let write = |value: &T| {
        Some(Row {
            value: value.clone(),
            updated_at: stamp,
        })
    };
    match stmt {
        Statement::Insert(value) => {
            if exists {
                return Err(Error::DuplicateKey { id });
            }
            staged.insert(id, write(value));
            Ok(ExecResult::affected(1))
        }
        Statement::Update(value) => {
            if !exists {
                return Ok(ExecResult::affected(0));
            }
            staged.insert(id, write(value));
            Ok(ExecResult::affected(1))
        }
        Statement::Upsert(value) => {
            staged.insert(id, write(value));
            Ok(ExecResult::affected(1))
        }
        Statement::Delete(_) => {
            if !exists {
                return Ok(ExecResult::affected(0));
            }
            staged.insert(id, None);
            Ok(ExecResult::affected(1))
        }
    }
}

fn apply<T>(table: &mut Table<T>, staged: Overlay<T>) {
    for (id, pending) in staged {
        match pending {
            Some(row) => {
                table.insert(id, row);
            }
            None => {
                table.remove(&id);
            }
        }
    }
}

/// Evaluate `query` over rows iterated in id order
fn run_query<'a, T: Entity>(rows: impl Iterator<Item = &'a Row<T>>, query: &Query) -> Vec<Row<T>> {
    match query {
        Query::ById(id) => rows.filter(|r| r.id() == *id).cloned().collect(),
        Query::Ids(ids) => rows.filter(|r| ids.contains(&r.id())).cloned().collect(),
        Query::OrderedById { offset, limit } => rows.skip(*offset).take(*limit).cloned().collect(),
        Query::UpdatedSince {
            since,
            offset,
            limit,
        } => {
            let mut newer: Vec<&Row<T>> = rows.filter(|r| r.updated_at > *since).collect();
            newer.sort_by_key(|r| (r.updated_at, r.id()));
            newer.into_iter().skip(*offset).take(*limit).cloned().collect()
        }
    }
}

impl<T: Entity> RowStore<T> for MemoryStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn exec(&self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        ctx.check()?;
        let mut data = self.data.write();
        let mut staged = Overlay::new();
        let result = stage(&data, &mut staged, stmt, self.clock.next())?;
        apply(&mut data, staged);
        Ok(result)
    }

    fn query(&self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        ctx.check()?;
        let data = self.data.read();
        Ok(run_query(data.values(), query))
    }

    fn query_row(&self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        ctx.check()?;
        Ok(self.data.read().get(&id).cloned())
    }

    fn begin_tx(&self, ctx: &OpContext, opts: TxOptions) -> Result<Box<dyn StoreTx<T>>> {
        ctx.check()?;
        Ok(Box::new(MemoryTx {
            store: self.name.clone(),
            data: Arc::clone(&self.data),
            clock: Arc::clone(&self.clock),
            read_only: opts.read_only,
            statements: Vec::new(),
            overlay: Overlay::new(),
        }))
    }
}

/// Transaction on a [`MemoryStore`]
struct MemoryTx<T> {
    store: String,
    data: Arc<RwLock<Table<T>>>,
    clock: Arc<UpdateClock>,
    read_only: bool,
    /// Replayed in order at commit
    statements: Vec<Statement<T>>,
    /// What the transaction has written so far, for its own reads
    overlay: Overlay<T>,
}

impl<T: Entity> MemoryTx<T> {
    fn view(&self) -> Table<T> {
        let mut merged = self.data.read().clone();
        for (id, pending) in &self.overlay {
            match pending {
                Some(row) => {
                    merged.insert(*id, row.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        merged
    }
}

impl<T: Entity> StoreTx<T> for MemoryTx<T> {
    fn exec(&mut self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult> {
        ctx.check()?;
        if self.read_only {
            return Err(Error::InvalidOperation(format!(
                "{} in read-only transaction on {}",
                stmt.kind(),
                self.store
            )));
        }
        let result = {
            let data = self.data.read();
            stage(&data, &mut self.overlay, stmt, self.clock.next())?
        };
        self.statements.push(stmt.clone());
        Ok(result)
    }

    fn query(&mut self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>> {
        ctx.check()?;
        if self.overlay.is_empty() {
            return Ok(run_query(self.data.read().values(), query));
        }
        Ok(run_query(self.view().values(), query))
    }

    fn query_row(&mut self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>> {
        ctx.check()?;
        if let Some(pending) = self.overlay.get(&id) {
            return Ok(pending.clone());
        }
        Ok(self.data.read().get(&id).cloned())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut data = self.data.write();
        let mut staged = Overlay::new();
        for stmt in &self.statements {
            stage(&data, &mut staged, stmt, self.clock.next())?;
        }
        apply(&mut data, staged);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Interaction;

    fn ctx() -> OpContext {
        OpContext::background()
    }

    fn store_with(ids: &[i64]) -> MemoryStore<Interaction> {
        MemoryStore::with_rows("src", ids.iter().map(|&id| Interaction::new(id, id * 10)))
    }

    #[test]
    fn test_insert_then_read() {
        let store = MemoryStore::new("src");
        let res = store
            .exec(&ctx(), &Statement::Insert(Interaction::new(1, 5)))
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        let row = store.query_row(&ctx(), 1).unwrap().unwrap();
        assert_eq!(row.value, Interaction::new(1, 5));
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let store = store_with(&[1]);
        let err = store
            .exec(&ctx(), &Statement::Insert(Interaction::new(1, 0)))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { id: 1 }));
        assert_eq!(store.get(1), Some(Interaction::new(1, 10)));
    }

    #[test]
    fn test_update_missing_affects_nothing() {
        let store = store_with(&[]);
        let res = store
            .exec(&ctx(), &Statement::Update(Interaction::new(9, 1)))
            .unwrap();
        assert_eq!(res.rows_affected, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_and_delete() {
        let store = store_with(&[1]);
        store
            .exec(&ctx(), &Statement::Upsert(Interaction::new(1, 99)))
            .unwrap();
        store
            .exec(&ctx(), &Statement::Upsert(Interaction::new(2, 7)))
            .unwrap();
        assert_eq!(store.get(1).unwrap().read_cnt, 99);
        assert_eq!(store.len(), 2);

        assert_eq!(store.exec(&ctx(), &Statement::Delete(1)).unwrap().rows_affected, 1);
        assert_eq!(store.exec(&ctx(), &Statement::Delete(1)).unwrap().rows_affected, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ordered_by_id_paging() {
        let store = store_with(&[5, 1, 3, 2, 4]);
        let page = store
            .query(&ctx(), &Query::OrderedById { offset: 1, limit: 2 })
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2, 3]);

        let tail = store
            .query(&ctx(), &Query::OrderedById { offset: 4, limit: 10 })
            .unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn test_updated_since_orders_by_update_time() {
        let store = store_with(&[1, 2, 3]);
        let watermark = store.high_watermark();
        store
            .exec(&ctx(), &Statement::Upsert(Interaction::new(3, 0)))
            .unwrap();
        store
            .exec(&ctx(), &Statement::Upsert(Interaction::new(1, 0)))
            .unwrap();

        let rows = store
            .query(
                &ctx(),
                &Query::UpdatedSince {
                    since: watermark,
                    offset: 0,
                    limit: 10,
                },
            )
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_updated_at_strictly_increases() {
        let store = MemoryStore::new("src");
        let mut last = Timestamp::EPOCH;
        for id in 0..1000 {
            store
                .exec(&ctx(), &Statement::Upsert(Interaction::new(id, 0)))
                .unwrap();
            let stamp = store.query_row(&ctx(), id).unwrap().unwrap().updated_at;
            assert!(stamp > last);
            last = stamp;
        }
    }

    #[test]
    fn test_query_ids() {
        let store = store_with(&[1, 2, 3, 4]);
        let rows = store.query(&ctx(), &Query::Ids(vec![4, 2, 8])).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_cancelled_context_rejected() {
        let store = store_with(&[1]);
        let token = dualwrite_core::CancelToken::new();
        token.cancel();
        let err = store
            .query_row(&OpContext::with_cancel(&token), 1)
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    #[test]
    fn test_tx_commit_makes_writes_visible() {
        let store = store_with(&[1]);
        let mut tx = store.begin_tx(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &Statement::Upsert(Interaction::new(2, 20)))
            .unwrap();
        tx.exec(&ctx(), &Statement::Delete(1)).unwrap();

        assert!(store.get(2).is_none());
        assert!(tx.query_row(&ctx(), 2).unwrap().is_some());
        assert!(tx.query_row(&ctx(), 1).unwrap().is_none());

        tx.commit().unwrap();
        assert!(store.get(1).is_none());
        assert_eq!(store.get(2), Some(Interaction::new(2, 20)));
    }

    #[test]
    fn test_tx_rollback_discards_writes() {
        let store = store_with(&[1]);
        let mut tx = store.begin_tx(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &Statement::Delete(1)).unwrap();
        tx.rollback().unwrap();
        assert!(store.get(1).is_some());
    }

    #[test]
    fn test_tx_dropped_discards_writes() {
        let store = store_with(&[]);
        {
            let mut tx = store.begin_tx(&ctx(), TxOptions::default()).unwrap();
            tx.exec(&ctx(), &Statement::Upsert(Interaction::new(1, 1)))
                .unwrap();
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_tx_query_sees_own_writes() {
        let store = store_with(&[1, 2]);
        let mut tx = store.begin_tx(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &Statement::Upsert(Interaction::new(3, 0)))
            .unwrap();
        tx.exec(&ctx(), &Statement::Delete(1)).unwrap();
        let rows = tx
            .query(&ctx(), &Query::OrderedById { offset: 0, limit: 10 })
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_read_only_tx_rejects_writes() {
        let store = store_with(&[1]);
        let mut tx = store
            .begin_tx(&ctx(), TxOptions { read_only: true })
            .unwrap();
        let err = tx.exec(&ctx(), &Statement::Delete(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(tx.query_row(&ctx(), 1).unwrap().is_some());
    }

    #[test]
    fn test_tx_commit_conflict_leaves_table_untouched() {
        let store = store_with(&[]);
        let mut tx = store.begin_tx(&ctx(), TxOptions::default()).unwrap();
        tx.exec(&ctx(), &Statement::Upsert(Interaction::new(1, 1)))
            .unwrap();
        tx.exec(&ctx(), &Statement::Insert(Interaction::new(2, 2)))
            .unwrap();

        // Someone else takes id 2 before we commit
        store
            .exec(&ctx(), &Statement::Insert(Interaction::new(2, 99)))
            .unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { id: 2 }));
        assert!(store.get(1).is_none());
        assert_eq!(store.get(2).unwrap().read_cnt, 99);
    }

    #[test]
    fn test_concurrent_upserts() {
        let store = Arc::new(MemoryStore::new("src"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store
                            .exec(
                                &OpContext::background(),
                                &Statement::Upsert(Interaction::new(t * 100 + i, i)),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }
}

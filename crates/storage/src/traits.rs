//! Row-level store abstraction
//!
//! Everything above this layer talks to "some relational store" through
//! [`RowStore`] and [`StoreTx`]. The interface is the minimum the migration
//! subsystem needs:
//!
//! - statement execution (`exec`)
//! - reads by id and ordered range scans (`query`, `query_row`)
//! - transactions with commit/rollback (`begin_tx`)
//!
//! Thread safety: `RowStore` implementations are shared between threads
//! (pooled-connection semantics) and must be `Send + Sync`. A `StoreTx` is
//! owned by the caller that began it.

use dualwrite_core::{Entity, OpContext, Result, Timestamp};

/// A row-level write
#[derive(Debug, Clone, PartialEq)]
pub enum Statement<T> {
    /// Insert a new row; fails with `DuplicateKey` if the id exists
    Insert(T),
    /// Replace an existing row; affects 0 rows if the id is absent
    Update(T),
    /// Insert, or replace every column on conflict
    Upsert(T),
    /// Delete by id; affects 0 rows if the id is absent
    Delete(i64),
}

impl<T: Entity> Statement<T> {
    /// Id of the row the statement touches
    pub fn row_id(&self) -> i64 {
        match self {
            Statement::Insert(v) | Statement::Update(v) | Statement::Upsert(v) => v.id(),
            Statement::Delete(id) => *id,
        }
    }

    /// Short name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Upsert(_) => "upsert",
            Statement::Delete(_) => "delete",
        }
    }
}

/// Outcome of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Number of rows inserted, changed or removed
    pub rows_affected: u64,
}

impl ExecResult {
    /// Result affecting `n` rows
    pub fn affected(n: u64) -> Self {
        Self { rows_affected: n }
    }
}

/// A row-level read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// The row with this id (zero or one row)
    ById(i64),
    /// Rows with any of these ids, ordered by id
    Ids(Vec<i64>),
    /// Page of all rows ordered by id
    OrderedById {
        /// Rows to skip
        offset: usize,
        /// Maximum rows to return
        limit: usize,
    },
    /// Page of rows updated strictly after `since`, ordered by update time then id
    UpdatedSince {
        /// Watermark (exclusive)
        since: Timestamp,
        /// Rows to skip
        offset: usize,
        /// Maximum rows to return
        limit: usize,
    },
}

/// A row as read from a store
#[derive(Debug, Clone, PartialEq)]
pub struct Row<T> {
    /// Entity snapshot
    pub value: T,
    /// When the store last wrote this row
    pub updated_at: Timestamp,
}

impl<T: Entity> Row<T> {
    /// Shorthand for `self.value.id()`
    pub fn id(&self) -> i64 {
        self.value.id()
    }
}

/// Options for [`RowStore::begin_tx`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Reject writes inside the transaction
    pub read_only: bool,
}

/// A pooled connection to one store
pub trait RowStore<T: Entity>: Send + Sync {
    /// Store name used in logs and errors
    fn name(&self) -> &str;

    /// Execute a single statement outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails or `ctx` is done.
    fn exec(&self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult>;

    /// Run a read and return all matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or `ctx` is done.
    fn query(&self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>>;

    /// Read a single row by id; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or `ctx` is done.
    fn query_row(&self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>>;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot open a transaction.
    fn begin_tx(&self, ctx: &OpContext, opts: TxOptions) -> Result<Box<dyn StoreTx<T>>>;
}

/// An open transaction on one store.
///
/// `commit` and `rollback` consume the handle; dropping an open handle
/// discards its writes.
pub trait StoreTx<T: Entity>: Send {
    /// Execute a statement inside the transaction
    fn exec(&mut self, ctx: &OpContext, stmt: &Statement<T>) -> Result<ExecResult>;

    /// Read inside the transaction (sees the transaction's own writes)
    fn query(&mut self, ctx: &OpContext, query: &Query) -> Result<Vec<Row<T>>>;

    /// Read one row inside the transaction
    fn query_row(&mut self, ctx: &OpContext, id: i64) -> Result<Option<Row<T>>>;

    /// Make the transaction's writes visible atomically
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the transaction's writes
    fn rollback(self: Box<Self>) -> Result<()>;
}

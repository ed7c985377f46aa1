//! Row repair
//!
//! A [`Fixer`] makes the target agree with the base for one row id. It does
//! not trust the event that triggered it: the base is re-read at repair time,
//! so a stale or duplicated report still converges on the current base state.
//! Repairing twice is the same as repairing once.

use std::sync::Arc;

use dualwrite_core::{Entity, InconsistencyEvent, OpContext, Result};
use dualwrite_storage::{RowStore, Statement};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a repair did to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    /// The base row was written over the target row (or inserted)
    Upserted,
    /// The base has no such row, so the target row was deleted
    Deleted,
}

/// Copies base rows onto a target, one id at a time
pub struct Fixer<T: Entity> {
    base: Arc<dyn RowStore<T>>,
    target: Arc<dyn RowStore<T>>,
}

impl<T: Entity> Fixer<T> {
    /// Repair `target` from `base`
    pub fn new(base: Arc<dyn RowStore<T>>, target: Arc<dyn RowStore<T>>) -> Self {
        Self { base, target }
    }

    /// Store treated as the source of truth
    pub fn base(&self) -> &Arc<dyn RowStore<T>> {
        &self.base
    }

    /// Store being repaired
    pub fn target(&self) -> &Arc<dyn RowStore<T>> {
        &self.target
    }

    /// Make row `id` in the target match the base.
    ///
    /// # Errors
    ///
    /// Propagates any base read or target write error; nothing is written
    /// when the base read fails.
    pub fn fix(&self, ctx: &OpContext, id: i64) -> Result<FixOutcome> {
        match self.base.query_row(ctx, id)? {
            Some(row) => {
                self.target.exec(ctx, &Statement::Upsert(row.value))?;
                debug!(id, base = %self.base.name(), target = %self.target.name(), "row upserted");
                Ok(FixOutcome::Upserted)
            }
            None => {
                let result = self.target.exec(ctx, &Statement::Delete(id))?;
                debug!(
                    id,
                    target = %self.target.name(),
                    rows_affected = result.rows_affected,
                    "row deleted"
                );
                Ok(FixOutcome::Deleted)
            }
        }
    }

    /// Repair the row an event reports, whatever its type
    pub fn fix_event(&self, ctx: &OpContext, event: &InconsistencyEvent) -> Result<FixOutcome> {
        self.fix(ctx, event.id)
    }
}

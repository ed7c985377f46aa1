//! Repair consumer command handlers.

use dualwrite_migrator::ControlPlane;

use crate::{Output, Result};

/// Handle StartFixer command.
pub fn start_fixer(migration: &dyn ControlPlane) -> Result<Output> {
    Ok(Output::Bool(migration.start_fixer()?))
}

/// Handle StopFixer command.
pub fn stop_fixer(migration: &dyn ControlPlane) -> Result<Output> {
    Ok(Output::Bool(migration.stop_fixer()?))
}

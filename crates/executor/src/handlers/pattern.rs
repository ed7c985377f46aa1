//! Pattern command handlers.

use dualwrite_migrator::ControlPlane;
use tracing::info;

use crate::{Output, Result};

/// Handle GetPattern command.
pub fn get_pattern(migration: &dyn ControlPlane) -> Result<Output> {
    Ok(Output::Pattern(migration.pattern()))
}

/// Handle UpdatePattern command.
pub fn update_pattern(migration: &dyn ControlPlane, pattern: &str) -> Result<Output> {
    let previous = migration.pattern();
    let next = migration.update_pattern(pattern)?;
    info!(
        migration = %migration.name(),
        from = %previous,
        to = %next,
        "pattern switched by command"
    );
    Ok(Output::Pattern(next))
}

//! Validation and lifecycle command handlers.

use dualwrite_migrator::{ControlPlane, ValidationMode, ValidationParams};

use crate::{Output, Result};

/// Handle StartValidation command.
pub fn start_validation(
    migration: &dyn ControlPlane,
    mode: ValidationMode,
    params: ValidationParams,
) -> Result<Output> {
    let status = migration.start_validation(mode, params)?;
    Ok(Output::Job(status))
}

/// Handle StopValidation command.
pub fn stop_validation(migration: &dyn ControlPlane, mode: ValidationMode) -> Result<Output> {
    Ok(Output::Bool(migration.stop_validation(mode)?))
}

/// Handle Status command.
pub fn status(migration: &dyn ControlPlane) -> Result<Output> {
    Ok(Output::Status(migration.status()))
}

/// Handle Shutdown command.
pub fn shutdown(migration: &dyn ControlPlane) -> Result<Output> {
    migration.shutdown()?;
    Ok(Output::Unit)
}

//! The Executor - single entry point to the migration control plane.
//!
//! The Executor keeps a registry of named migrations and routes each command
//! to the handler for its category. It holds no migration state of its own:
//! patterns, jobs, the repair consumer and counters all live in the
//! registered control planes.

use std::collections::BTreeMap;
use std::sync::Arc;

use dualwrite_migrator::ControlPlane;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::handlers;
use crate::{Command, Error, Output, Result};

/// The command executor.
///
/// # Thread Safety
///
/// Executor is `Send + Sync` and can be shared across threads.
///
/// # Example
///
/// ```ignore
/// use dualwrite_executor::{Command, Executor};
///
/// let executor = Executor::new();
/// executor.register(migration)?;
///
/// executor.execute(Command::UpdatePattern {
///     migration: "interactive".into(),
///     pattern: "src_first".into(),
/// })?;
/// ```
#[derive(Default)]
pub struct Executor {
    migrations: RwLock<BTreeMap<String, Arc<dyn ControlPlane>>>,
}

impl Executor {
    /// Create an executor with no migrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under its own name.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the name is taken and `InvalidInput` if it is
    /// empty.
    pub fn register(&self, migration: Arc<dyn ControlPlane>) -> Result<()> {
        let name = migration.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput {
                reason: "migration name must not be empty".to_string(),
            });
        }
        let mut migrations = self.migrations.write();
        if migrations.contains_key(&name) {
            return Err(Error::Conflict {
                reason: format!("migration {} already registered", name),
            });
        }
        info!(migration = %name, "migration registered");
        migrations.insert(name, migration);
        Ok(())
    }

    /// Remove a migration from the registry without shutting it down.
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn ControlPlane>> {
        self.migrations.write().remove(name)
    }

    /// Look up a registered migration.
    pub fn migration(&self, name: &str) -> Result<Arc<dyn ControlPlane>> {
        self.migrations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MigrationNotFound {
                migration: name.to_string(),
            })
    }

    /// Execute a single command.
    ///
    /// Returns the command result or an error.
    pub fn execute(&self, cmd: Command) -> Result<Output> {
        debug!(command = cmd.name(), migration = ?cmd.migration(), "executing command");
        match cmd {
            Command::Ping => Ok(Output::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            Command::ListMigrations => Ok(Output::Migrations(
                self.migrations.read().keys().cloned().collect(),
            )),

            // Pattern commands
            Command::GetPattern { migration } => {
                handlers::pattern::get_pattern(self.migration(&migration)?.as_ref())
            }
            Command::UpdatePattern { migration, pattern } => {
                handlers::pattern::update_pattern(self.migration(&migration)?.as_ref(), &pattern)
            }

            // Validation commands
            Command::StartValidation {
                migration,
                mode,
                params,
            } => handlers::validation::start_validation(
                self.migration(&migration)?.as_ref(),
                mode,
                params,
            ),
            Command::StopValidation { migration, mode } => {
                handlers::validation::stop_validation(self.migration(&migration)?.as_ref(), mode)
            }

            // Repair commands
            Command::StartFixer { migration } => {
                handlers::repair::start_fixer(self.migration(&migration)?.as_ref())
            }
            Command::StopFixer { migration } => {
                handlers::repair::stop_fixer(self.migration(&migration)?.as_ref())
            }

            // Lifecycle commands
            Command::Status { migration } => {
                handlers::validation::status(self.migration(&migration)?.as_ref())
            }
            Command::Shutdown { migration } => {
                handlers::validation::shutdown(self.migration(&migration)?.as_ref())
            }
        }
    }

    /// Execute multiple commands sequentially.
    ///
    /// Returns all results in the same order as the input commands. A failing
    /// command does not stop the ones after it.
    pub fn execute_many(&self, cmds: Vec<Command>) -> Vec<Result<Output>> {
        cmds.into_iter().map(|cmd| self.execute(cmd)).collect()
    }
}

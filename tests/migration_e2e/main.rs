//! Migration End-to-End Test Suite
//!
//! Drives whole migrations through the command interface the way an operator
//! would: pattern switches, validation jobs and status reads go through the
//! [`Executor`], business writes go through the dual-write connector, and the
//! repair consumer runs in the background.
//!
//! ## Modules
//!
//! - `lifecycle`: a table walked from `src_only` to `dst_only`
//! - `incremental`: backfill of live writes by an incremental job
//! - `json_control`: the same control flow over JSON lines
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test migration_e2e
//! cargo test --test migration_e2e lifecycle::
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use dualwrite::{
    Command, ControlPlane, Executor, JobState, JobStatus, MemoryStore, Migration,
    MigrationStatus, MigratorConfig, OpContext, Output, RowStore, Statement, ValidationMode,
};
use dualwrite_storage::testing::Interaction;

mod incremental;
mod json_control;
mod lifecycle;

// ============================================================================
// Helper Functions
// ============================================================================

/// Name every test migration is registered under
pub const NAME: &str = "interactive";

/// Stores, migration and executor of one test
pub struct Harness {
    pub src: Arc<MemoryStore<Interaction>>,
    pub dst: Arc<MemoryStore<Interaction>>,
    pub migration: Arc<Migration<Interaction>>,
    pub executor: Executor,
}

impl Harness {
    /// Migration over `src_rows` and `dst_rows` with the repair consumer running
    pub fn new(src_rows: Vec<Interaction>, dst_rows: Vec<Interaction>) -> Self {
        init_tracing();
        let src = Arc::new(MemoryStore::with_rows("src", src_rows));
        let dst = Arc::new(MemoryStore::with_rows("dst", dst_rows));
        let mut config = MigratorConfig::default();
        config.validator.batch_size = 6;
        config.fixer.poll_interval_ms = 10;

        let migration = Arc::new(
            Migration::<Interaction>::in_memory(NAME, src.clone(), dst.clone(), config).unwrap(),
        );
        let executor = Executor::new();
        let control: Arc<dyn ControlPlane> = migration.clone();
        executor.register(control).unwrap();

        let harness = Self {
            src,
            dst,
            migration,
            executor,
        };
        harness.run(Command::StartFixer {
            migration: NAME.into(),
        });
        harness
    }

    /// Execute and panic on error
    pub fn run(&self, cmd: Command) -> Output {
        match self.executor.execute(cmd.clone()) {
            Ok(output) => output,
            Err(e) => panic!("{} failed: {}", cmd.name(), e),
        }
    }

    pub fn set_pattern(&self, pattern: &str) {
        self.run(Command::UpdatePattern {
            migration: NAME.into(),
            pattern: pattern.into(),
        });
    }

    pub fn status(&self) -> MigrationStatus {
        match self.run(Command::Status {
            migration: NAME.into(),
        }) {
            Output::Status(status) => status,
            other => panic!("Expected Status output, got {:?}", other),
        }
    }

    pub fn job(&self, mode: ValidationMode) -> Option<JobStatus> {
        self.status().jobs.into_iter().find(|job| job.mode == mode)
    }

    /// Write through the connector and wait for best-effort work to land
    pub fn write(&self, stmts: Vec<Statement<Interaction>>) {
        let ctx = OpContext::background();
        for stmt in &stmts {
            self.migration.pool().exec(&ctx, stmt).unwrap();
        }
        self.migration.pool().flush();
    }

    /// Wait for a full job to finish and for every repair it caused
    pub fn await_full(&self) -> JobStatus {
        wait_until("full validation", || {
            self.job(ValidationMode::Full)
                .map_or(false, |job| job.state == JobState::Completed)
        });
        self.await_repairs();
        self.job(ValidationMode::Full).unwrap()
    }

    pub fn await_repairs(&self) {
        wait_until("repairs", || {
            self.status().fixer.map_or(false, |fixer| fixer.lag == 0)
        });
    }

    pub fn assert_converged(&self) {
        assert_eq!(self.src.snapshot(), self.dst.snapshot());
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

pub fn rows(ids: std::ops::RangeInclusive<i64>) -> Vec<Interaction> {
    ids.map(|id| Interaction::new(id, id * 10)).collect()
}

pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "timed out waiting for {}",
            what
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

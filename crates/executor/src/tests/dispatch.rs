//! Tests for command dispatch against a live migration.

use std::sync::Arc;

use dualwrite_core::{Direction, MigrationPattern};
use dualwrite_migrator::{ControlPlane, JobState, ValidationMode, ValidationParams};

use super::{create_test_executor, wait_until, MIGRATION};
use crate::{Command, Error, Executor, Output};

// ============================================================================
// Helper Functions
// ============================================================================

fn status(executor: &Executor) -> dualwrite_migrator::MigrationStatus {
    match executor.execute(Command::Status {
        migration: MIGRATION.into(),
    }) {
        Ok(Output::Status(status)) => status,
        other => panic!("Expected Status output, got {:?}", other),
    }
}

fn start(executor: &Executor, mode: ValidationMode, params: ValidationParams) -> crate::Result<Output> {
    executor.execute(Command::StartValidation {
        migration: MIGRATION.into(),
        mode,
        params,
    })
}

// ============================================================================
// System
// ============================================================================

#[test]
fn test_ping_reports_version() {
    let executor = Executor::new();
    assert_eq!(
        executor.execute(Command::Ping),
        Ok(Output::Pong {
            version: env!("CARGO_PKG_VERSION").to_string()
        })
    );
}

#[test]
fn test_list_migrations_tracks_registry() {
    let (executor, migration) = create_test_executor();
    let extra: Arc<dyn ControlPlane> = migration.clone();
    executor.deregister(MIGRATION);
    assert_eq!(
        executor.execute(Command::ListMigrations),
        Ok(Output::Migrations(vec![]))
    );
    executor.register(extra).unwrap();
    assert_eq!(
        executor.execute(Command::ListMigrations),
        Ok(Output::Migrations(vec![MIGRATION.to_string()]))
    );
}

#[test]
fn test_register_duplicate_conflicts() {
    let (executor, migration) = create_test_executor();
    let again: Arc<dyn ControlPlane> = migration.clone();
    assert!(matches!(executor.register(again), Err(Error::Conflict { .. })));
}

#[test]
fn test_unknown_migration() {
    let executor = Executor::new();
    assert_eq!(
        executor.execute(Command::Status {
            migration: "ghost".into()
        }),
        Err(Error::MigrationNotFound {
            migration: "ghost".into()
        })
    );
}

// ============================================================================
// Pattern
// ============================================================================

#[test]
fn test_update_pattern_reaches_pool() {
    let (executor, migration) = create_test_executor();
    let out = executor
        .execute(Command::UpdatePattern {
            migration: MIGRATION.into(),
            pattern: "dst_only".into(),
        })
        .unwrap();
    assert_eq!(out, Output::Pattern(MigrationPattern::DstOnly));
    assert_eq!(migration.pool().pattern(), MigrationPattern::DstOnly);
}

#[test]
fn test_unknown_pattern_leaves_pattern_unchanged() {
    let (executor, migration) = create_test_executor();
    migration.pool().set_pattern(MigrationPattern::SrcFirst);

    let err = executor
        .execute(Command::UpdatePattern {
            migration: MIGRATION.into(),
            pattern: "SRC_FIRST".into(),
        })
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnknownPattern {
            pattern: "SRC_FIRST".into()
        }
    );
    assert_eq!(
        executor.execute(Command::GetPattern {
            migration: MIGRATION.into()
        }),
        Ok(Output::Pattern(MigrationPattern::SrcFirst))
    );
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_full_validation_reports_missing_rows() {
    let (executor, _migration) = create_test_executor();

    match start(&executor, ValidationMode::Full, ValidationParams::default()).unwrap() {
        Output::Job(job) => {
            assert_eq!(job.mode, ValidationMode::Full);
            assert_eq!(job.direction, Direction::Src);
        }
        other => panic!("Expected Job output, got {:?}", other),
    }

    wait_until("full validation", || {
        status(&executor)
            .jobs
            .first()
            .map_or(false, |job| job.state == JobState::Completed)
    });
    let job = status(&executor).jobs.remove(0);
    // Forward leg reads 10 src rows, mirror leg 7 dst rows
    assert_eq!(job.scanned, 17);
    assert_eq!(job.events, 3);
    assert_eq!(job.publish_failures, 0);
}

#[test]
fn test_stop_validation() {
    let (executor, _migration) = create_test_executor();
    let stop = Command::StopValidation {
        migration: MIGRATION.into(),
        mode: ValidationMode::Incremental,
    };
    assert_eq!(executor.execute(stop.clone()), Ok(Output::Bool(false)));

    let mut params = ValidationParams::new(Direction::Dst);
    params.sleep_interval_ms = Some(10);
    start(&executor, ValidationMode::Incremental, params).unwrap();
    assert_eq!(executor.execute(stop.clone()), Ok(Output::Bool(true)));

    let job = status(&executor).jobs.remove(0);
    assert_eq!(job.mode, ValidationMode::Incremental);
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(executor.execute(stop), Ok(Output::Bool(false)));
}

#[test]
fn test_incremental_zero_sleep_rejected() {
    let (executor, _migration) = create_test_executor();
    let mut params = ValidationParams::default();
    params.sleep_interval_ms = Some(0);
    assert!(matches!(
        start(&executor, ValidationMode::Incremental, params),
        Err(Error::InvalidInput { .. })
    ));
}

#[test]
fn test_full_with_sleep_interval_rejected() {
    let (executor, _migration) = create_test_executor();
    let mut params = ValidationParams::default();
    params.sleep_interval_ms = Some(100);
    assert!(matches!(
        start(&executor, ValidationMode::Full, params),
        Err(Error::InvalidInput { .. })
    ));
    assert!(status(&executor).jobs.is_empty());
}

#[test]
fn test_zero_batch_size_rejected() {
    let (executor, _migration) = create_test_executor();
    let mut params = ValidationParams::default();
    params.batch_size = Some(0);
    assert!(matches!(
        start(&executor, ValidationMode::Full, params),
        Err(Error::InvalidInput { .. })
    ));
}

// ============================================================================
// Repair
// ============================================================================

#[test]
fn test_start_and_stop_fixer() {
    let (executor, migration) = create_test_executor();
    let start_fixer = Command::StartFixer {
        migration: MIGRATION.into(),
    };
    let stop_fixer = Command::StopFixer {
        migration: MIGRATION.into(),
    };

    assert_eq!(executor.execute(start_fixer.clone()), Ok(Output::Bool(true)));
    assert_eq!(executor.execute(start_fixer), Ok(Output::Bool(false)));
    assert!(migration.fixer_running());
    assert!(status(&executor).fixer.unwrap().running);

    assert_eq!(executor.execute(stop_fixer.clone()), Ok(Output::Bool(true)));
    assert_eq!(executor.execute(stop_fixer), Ok(Output::Bool(false)));
    assert!(!migration.fixer_running());
}

#[test]
fn test_fixer_repairs_reported_rows() {
    let (executor, migration) = create_test_executor();
    executor
        .execute(Command::StartFixer {
            migration: MIGRATION.into(),
        })
        .unwrap();
    start(&executor, ValidationMode::Full, ValidationParams::default()).unwrap();

    wait_until("repairs", || {
        status(&executor).fixer.map_or(false, |f| f.stats.upserted == 3 && f.lag == 0)
    });
    assert_eq!(migration.fix_consumer().stats().failed, 0);
}

#[test]
fn test_scheduler_alone_has_no_fixer() {
    let (executor, migration) = create_test_executor();
    executor.deregister(MIGRATION);
    let scheduler: Arc<dyn ControlPlane> = migration.scheduler().clone();
    executor.register(scheduler).unwrap();

    assert!(matches!(
        executor.execute(Command::StartFixer {
            migration: MIGRATION.into()
        }),
        Err(Error::InvalidInput { .. })
    ));
    assert!(status(&executor).fixer.is_none());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_status_reports_pattern_and_counters() {
    let (executor, _migration) = create_test_executor();
    let status = status(&executor);
    assert_eq!(status.name, MIGRATION);
    assert_eq!(status.pattern, MigrationPattern::SrcOnly);
    assert!(status.jobs.is_empty());
    assert_eq!(status.secondary_failures, 0);
    let fixer = status.fixer.unwrap();
    assert!(!fixer.running);
    assert_eq!(fixer.lag, 0);
}

#[test]
fn test_shutdown_stops_fixer() {
    let (executor, migration) = create_test_executor();
    executor
        .execute(Command::StartFixer {
            migration: MIGRATION.into(),
        })
        .unwrap();
    assert!(migration.fixer_running());

    assert_eq!(
        executor.execute(Command::Shutdown {
            migration: MIGRATION.into()
        }),
        Ok(Output::Unit)
    );
    assert!(!migration.fixer_running());
    assert!(!status(&executor).fixer.unwrap().running);
    assert!(matches!(
        executor.execute(Command::StartFixer {
            migration: MIGRATION.into()
        }),
        Err(Error::InvalidInput { .. })
    ));
}

#[test]
fn test_shutdown_rejects_new_jobs() {
    let (executor, _migration) = create_test_executor();
    assert_eq!(
        executor.execute(Command::Shutdown {
            migration: MIGRATION.into()
        }),
        Ok(Output::Unit)
    );
    assert!(matches!(
        start(&executor, ValidationMode::Full, ValidationParams::default()),
        Err(Error::InvalidInput { .. })
    ));
    // A second shutdown is harmless
    assert_eq!(
        executor.execute(Command::Shutdown {
            migration: MIGRATION.into()
        }),
        Ok(Output::Unit)
    );
}

//! A table walked through all four patterns
//!
//! dst starts empty. Each phase writes through the connector, validates, and
//! checks that the repair consumer converges the stores before the next
//! switch.

use dualwrite::{
    Command, Direction, MigrationPattern, Output, Statement, ValidationMode, ValidationParams,
};
use dualwrite_storage::testing::Interaction;

use crate::{rows, Harness, NAME};

fn start_full(h: &Harness, direction: Direction) {
    let out = h.run(Command::StartValidation {
        migration: NAME.into(),
        mode: ValidationMode::Full,
        params: ValidationParams::new(direction),
    });
    assert!(matches!(out, Output::Job(_)));
}

#[test]
fn test_walk_from_src_only_to_dst_only() {
    let h = Harness::new(rows(1..=20), vec![]);

    // src_first: new writes reach both stores, old rows exist only in src
    h.set_pattern("src_first");
    h.write(vec![
        Statement::Insert(Interaction::new(21, 210)),
        Statement::Upsert(Interaction::new(3, 31)),
    ]);
    assert!(h.dst.get(21).is_some());
    assert!(h.dst.get(3).is_some());

    start_full(&h, Direction::Src);
    let job = h.await_full();
    assert_eq!(job.events, 19);
    h.assert_converged();

    start_full(&h, Direction::Src);
    assert_eq!(h.await_full().events, 0);

    // dst_first: dst becomes the base
    h.set_pattern("dst_first");
    h.write(vec![
        Statement::Update(Interaction::new(5, 55).with_likes(2)),
        Statement::Delete(7),
    ]);
    start_full(&h, Direction::Dst);
    assert_eq!(h.await_full().events, 0);
    h.assert_converged();

    // dst_only: src is no longer written
    h.set_pattern("dst_only");
    h.write(vec![Statement::Insert(Interaction::new(22, 220))]);
    assert!(h.src.get(22).is_none());
    assert_eq!(h.dst.get(22), Some(Interaction::new(22, 220)));

    let status = h.status();
    assert_eq!(status.pattern, MigrationPattern::DstOnly);
    assert_eq!(status.secondary_failures, 0);
    assert!(h.migration.fix_consumer().stats().upserted >= 19);
}

#[test]
fn test_reverse_validation_removes_extra_target_rows() {
    // dst holds rows src never had
    let h = Harness::new(rows(1..=5), rows(1..=8));
    h.set_pattern("dst_first");

    start_full(&h, Direction::Src);
    let job = h.await_full();
    // Rows 6..=8 are absent from src, the base of a SRC job
    assert_eq!(job.events, 3);
    assert_eq!(h.dst.len(), 5);
    h.assert_converged();
}

#[test]
fn test_diverged_values_overwritten_from_base() {
    let mut dst = rows(1..=12);
    dst[4].read_cnt = -1;
    dst[9] = dst[9].clone().with_likes(40);
    let h = Harness::new(rows(1..=12), dst);

    start_full(&h, Direction::Src);
    assert_eq!(h.await_full().events, 2);
    h.assert_converged();
}

#[test]
fn test_shutdown_stops_jobs_and_rejects_new_ones() {
    let h = Harness::new(rows(1..=3), vec![]);
    let mut params = ValidationParams::default();
    params.sleep_interval_ms = Some(10);
    h.run(Command::StartValidation {
        migration: NAME.into(),
        mode: ValidationMode::Incremental,
        params,
    });

    assert_eq!(
        h.run(Command::Shutdown {
            migration: NAME.into()
        }),
        Output::Unit
    );
    let job = h.job(ValidationMode::Incremental).unwrap();
    assert_eq!(job.state, dualwrite::JobState::Cancelled);
    // The repair consumer stops with the jobs
    assert!(!h.migration.fixer_running());
    assert!(!h.status().fixer.unwrap().running);
    assert!(h
        .executor
        .execute(Command::StartFixer {
            migration: NAME.into()
        })
        .is_err());
    assert!(h
        .executor
        .execute(Command::StartValidation {
            migration: NAME.into(),
            mode: ValidationMode::Full,
            params: ValidationParams::default(),
        })
        .is_err());
    h.migration.shutdown().unwrap();
}

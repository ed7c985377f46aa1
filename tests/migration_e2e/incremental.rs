//! Backfill of live writes by an incremental job
//!
//! Under `src_only` the connector writes src alone; an incremental SRC job
//! polling from the current watermark must carry every such write to dst.

use std::time::Duration;

use dualwrite::{Command, Direction, JobState, Output, Statement, ValidationMode, ValidationParams};
use dualwrite_storage::testing::Interaction;

use crate::{rows, wait_until, Harness, NAME};

fn start_incremental(h: &Harness) {
    let mut params = ValidationParams::new(Direction::Src);
    params.sleep_interval_ms = Some(10);
    params.since = Some(h.src.high_watermark());
    let out = h.run(Command::StartValidation {
        migration: NAME.into(),
        mode: ValidationMode::Incremental,
        params,
    });
    match out {
        Output::Job(job) => assert_eq!(job.state, JobState::Running),
        other => panic!("Expected Job output, got {:?}", other),
    }
}

#[test]
fn test_incremental_job_backfills_new_writes() {
    let h = Harness::new(rows(1..=10), rows(1..=10));
    start_incremental(&h);

    h.write(vec![
        Statement::Insert(Interaction::new(11, 110)),
        Statement::Update(Interaction::new(4, 44)),
        Statement::Delete(9),
    ]);
    assert!(h.dst.get(11).is_none());

    wait_until("insert backfilled", || h.dst.get(11).is_some());
    wait_until("update backfilled", || h.dst.get(4) == h.src.get(4));

    assert_eq!(
        h.run(Command::StopValidation {
            migration: NAME.into(),
            mode: ValidationMode::Incremental,
        }),
        Output::Bool(true)
    );
    let job = h.job(ValidationMode::Incremental).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.events >= 2);

    // A delete leaves no src row for the watermark scan; a full pass settles it
    h.run(Command::StartValidation {
        migration: NAME.into(),
        mode: ValidationMode::Full,
        params: ValidationParams::default(),
    });
    h.await_full();
    assert!(h.dst.get(9).is_none());
    h.assert_converged();
}

#[test]
fn test_full_pass_after_incremental_catches_deletes() {
    let h = Harness::new(rows(1..=6), rows(1..=6));
    start_incremental(&h);
    h.write(vec![Statement::Delete(2), Statement::Insert(Interaction::new(7, 70))]);
    wait_until("insert backfilled", || h.dst.get(7).is_some());

    h.run(Command::StartValidation {
        migration: NAME.into(),
        mode: ValidationMode::Full,
        params: ValidationParams::default(),
    });
    // Row 2 is reported here unless the incremental mirror scan got to it first
    assert!(h.await_full().events <= 1);
    h.assert_converged();

    // Both modes run side by side
    let status = h.status();
    assert_eq!(status.jobs.len(), 2);
    assert_eq!(status.jobs[0].mode, ValidationMode::Full);
    assert_eq!(status.jobs[1].mode, ValidationMode::Incremental);
    assert_eq!(status.jobs[1].state, JobState::Running);
}

#[test]
fn test_restarting_incremental_replaces_running_job() {
    let h = Harness::new(rows(1..=3), rows(1..=3));
    start_incremental(&h);
    let first = h.job(ValidationMode::Incremental).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    start_incremental(&h);

    let status = h.status();
    assert_eq!(status.jobs.len(), 1);
    assert_eq!(status.jobs[0].state, JobState::Running);
    assert!(status.jobs[0].started_at >= first.started_at);
}

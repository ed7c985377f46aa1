//! Test modules for the executor crate.

pub mod dispatch;
pub mod serialization;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dualwrite_migrator::{ControlPlane, Migration, MigratorConfig};
use dualwrite_storage::testing::Interaction;
use dualwrite_storage::MemoryStore;

use crate::Executor;

/// Name every test migration is registered under
pub const MIGRATION: &str = "interactive";

/// Migration over src rows 1..=10 and dst rows 1..=7, registered with a
/// fresh executor. The repair consumer is not started.
pub fn create_test_executor() -> (Executor, Arc<Migration<Interaction>>) {
    let src = Arc::new(MemoryStore::with_rows(
        "src",
        (1..=10).map(|id| Interaction::new(id, id)),
    ));
    let dst = Arc::new(MemoryStore::with_rows(
        "dst",
        (1..=7).map(|id| Interaction::new(id, id)),
    ));
    let migration = Arc::new(
        Migration::<Interaction>::in_memory(MIGRATION, src, dst, MigratorConfig::default()).unwrap(),
    );
    let executor = Executor::new();
    let control: Arc<dyn ControlPlane> = migration.clone();
    executor.register(control).unwrap();
    (executor, migration)
}

/// Poll `done` every few milliseconds for up to ten seconds
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

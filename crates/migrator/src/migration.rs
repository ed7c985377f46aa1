//! One fully wired migration
//!
//! [`Migration`] assembles the pieces a deployment needs for one table: the
//! shared pattern cell, the dual-write pool, the inconsistency topic and its
//! producer, the scheduler, and the repair consumer. The topic and consumer
//! offsets are either in memory or stored under a directory.
//!
//! A `Migration` is the [`ControlPlane`] an executor registers: validation
//! commands go to the scheduler, fixer commands to the repair consumer, and
//! shutdown stops both.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use dualwrite_connpool::DoubleWritePool;
use dualwrite_core::{CancelToken, Entity, Error, MigrationPattern, PatternCell, Result};
use dualwrite_events::{ConsumerGroup, DurabilityMode, OffsetStore, Topic, TopicProducer};
use dualwrite_storage::RowStore;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::MigratorConfig;
use crate::fix_consumer::FixConsumer;
use crate::scheduler::{
    ControlPlane, JobStatus, MigrationStatus, Scheduler, ValidationMode, ValidationParams,
};

/// Offset log file name inside a migration directory
pub const OFFSETS_FILE_NAME: &str = "offsets.log";

struct FixerThread {
    cancel: CancelToken,
    handle: JoinHandle<Result<()>>,
}

/// Pool, channel, scheduler and repair consumer of one migration
pub struct Migration<T: Entity> {
    name: String,
    config: MigratorConfig,
    pool: Arc<DoubleWritePool<T>>,
    topic: Arc<Topic>,
    scheduler: Arc<Scheduler<T>>,
    fixer: Arc<FixConsumer<T>>,
    fixer_thread: Mutex<Option<FixerThread>>,
}

impl<T: Entity> Migration<T> {
    /// Wire a migration whose topic and offsets live in memory
    pub fn in_memory(
        name: impl Into<String>,
        src: Arc<dyn RowStore<T>>,
        dst: Arc<dyn RowStore<T>>,
        config: MigratorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let topic = Topic::in_memory(config.topic.clone(), config.partitions)?;
        Self::assemble(name.into(), src, dst, config, topic, OffsetStore::in_memory())
    }

    /// Wire a migration whose topic and offsets are stored under `dir`
    pub fn open(
        name: impl Into<String>,
        src: Arc<dyn RowStore<T>>,
        dst: Arc<dyn RowStore<T>>,
        config: MigratorConfig,
        dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        let topic = Topic::open(
            dir,
            config.topic.clone(),
            config.partitions,
            DurabilityMode::default(),
        )?;
        let offsets = OffsetStore::open(dir.join(OFFSETS_FILE_NAME), DurabilityMode::Strict)?;
        Self::assemble(name.into(), src, dst, config, topic, offsets)
    }

    fn assemble(
        name: String,
        src: Arc<dyn RowStore<T>>,
        dst: Arc<dyn RowStore<T>>,
        config: MigratorConfig,
        topic: Topic,
        offsets: OffsetStore,
    ) -> Result<Self> {
        let topic = Arc::new(topic);
        let pool = Arc::new(DoubleWritePool::new(
            Arc::clone(&src),
            Arc::clone(&dst),
            Arc::new(PatternCell::default()),
            config.pool.clone(),
        )?);
        let producer = Arc::new(TopicProducer::new(Arc::clone(&topic)));
        let scheduler = Arc::new(Scheduler::new(
            name.clone(),
            Arc::clone(&pool),
            producer,
            config.validator.clone(),
        ));
        let group = ConsumerGroup::new(
            Arc::clone(&topic),
            Arc::new(offsets),
            config.consumer_group.clone(),
        )?;
        if config.fixer.release_handled {
            // Replayed events the group already handled
            let released = group.release_committed()?;
            if released > 0 {
                info!(migration = %name, released, "released handled events");
            }
        }
        let fixer = Arc::new(FixConsumer::new(src, dst, group, &config.fixer));

        info!(migration = %name, topic = %topic.name(), "migration assembled");
        Ok(Self {
            name,
            config,
            pool,
            topic,
            scheduler,
            fixer,
            fixer_thread: Mutex::new(None),
        })
    }

    /// Migration name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the migration was built with
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Dual-write pool business code reads and writes through
    pub fn pool(&self) -> &Arc<DoubleWritePool<T>> {
        &self.pool
    }

    /// Inconsistency topic
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    /// Control plane
    pub fn scheduler(&self) -> &Arc<Scheduler<T>> {
        &self.scheduler
    }

    /// Repair consumer
    pub fn fix_consumer(&self) -> &Arc<FixConsumer<T>> {
        &self.fixer
    }

    /// Start the repair consumer thread
    ///
    /// Returns `false` if it was already running.
    ///
    /// # Errors
    ///
    /// Fails after [`Migration::shutdown`], or if the thread cannot be
    /// spawned.
    pub fn start_fixer(&self) -> Result<bool> {
        let mut slot = self.fixer_thread.lock();
        if self.scheduler.is_shut_down() {
            return Err(Error::InvalidOperation(format!(
                "migration {} is shut down",
                self.name
            )));
        }
        if slot.is_some() {
            return Ok(false);
        }
        let cancel = CancelToken::new();
        let handle = Arc::clone(&self.fixer).start(cancel.clone())?;
        *slot = Some(FixerThread { cancel, handle });
        info!(migration = %self.name, "repair consumer started");
        Ok(true)
    }

    /// Stop the repair consumer thread and wait for it
    ///
    /// Returns whether it was running.
    pub fn stop_fixer(&self) -> Result<bool> {
        let running = self.fixer_thread.lock().take();
        match running {
            Some(FixerThread { cancel, handle }) => {
                cancel.cancel();
                handle.join().map_err(|_| {
                    Error::InvalidOperation(format!("repair consumer of {} panicked", self.name))
                })??;
                info!(migration = %self.name, "repair consumer stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether the repair consumer thread is running
    pub fn fixer_running(&self) -> bool {
        self.fixer_thread.lock().is_some()
    }

    /// Scheduler status plus the repair consumer
    pub fn status(&self) -> MigrationStatus {
        let mut status = self.scheduler.status();
        status.fixer = Some(self.fixer.status(self.fixer_running()));
        status
    }

    /// Stop the consumer and every job, drain best-effort writes, and sync
    /// the topic
    pub fn shutdown(&self) -> Result<()> {
        // Close the scheduler first so the fixer cannot be restarted meanwhile
        self.scheduler.shutdown();
        let stopped = self.stop_fixer();
        self.pool.shutdown();
        if let Err(e) = self.topic.sync() {
            error!(migration = %self.name, error = %e, "topic sync failed");
            return Err(e);
        }
        info!(migration = %self.name, "migration shut down");
        stopped.map(|_| ())
    }
}

impl<T: Entity> ControlPlane for Migration<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_pattern(&self, pattern: &str) -> Result<MigrationPattern> {
        self.scheduler.update_pattern(pattern)
    }

    fn pattern(&self) -> MigrationPattern {
        self.scheduler.pattern()
    }

    fn start_validation(&self, mode: ValidationMode, params: ValidationParams) -> Result<JobStatus> {
        match mode {
            ValidationMode::Full => self.scheduler.start_full_validation(params),
            ValidationMode::Incremental => self.scheduler.start_incr_validation(params),
        }
    }

    fn stop_validation(&self, mode: ValidationMode) -> Result<bool> {
        self.scheduler.stop_validation(mode)
    }

    fn status(&self) -> MigrationStatus {
        Migration::status(self)
    }

    fn start_fixer(&self) -> Result<bool> {
        Migration::start_fixer(self)
    }

    fn stop_fixer(&self) -> Result<bool> {
        Migration::stop_fixer(self)
    }

    fn shutdown(&self) -> Result<()> {
        Migration::shutdown(self)
    }
}

impl<T: Entity> Drop for Migration<T> {
    fn drop(&mut self) {
        if let Some(FixerThread { cancel, handle }) = self.fixer_thread.get_mut().take() {
            cancel.cancel();
            let _ = handle.join();
        }
    }
}

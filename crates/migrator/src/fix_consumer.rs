//! Repair consumer
//!
//! Consumes inconsistency events and repairs each reported row. Events with
//! direction `SRC` are repaired from the source onto the destination; `DST`
//! events the other way round. Each repair gets its own deadline and is not
//! tied to the consumer's cancellation, so stopping the consumer never
//! abandons a write halfway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dualwrite_core::{CancelToken, Direction, Entity, Error, InconsistencyEvent, OpContext, Result};
use dualwrite_events::{ConsumerGroup, ConsumerOptions, JsonHandler, Message};
use dualwrite_storage::RowStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::FixerConfig;
use crate::fixer::{FixOutcome, Fixer};

/// Repair counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixStats {
    /// Rows written from the base
    pub upserted: u64,
    /// Rows deleted because the base no longer has them
    pub deleted: u64,
    /// Repairs that failed
    pub failed: u64,
}

/// Repair consumer as reported by a migration's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixerStatus {
    /// Whether the consumer thread is running
    pub running: bool,
    /// Events published but not yet committed by the group
    pub lag: u64,
    /// Repairs so far
    pub stats: FixStats,
}

#[derive(Debug, Default)]
struct FixCounters {
    upserted: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
}

/// Consumer that turns inconsistency events into repairs
pub struct FixConsumer<T: Entity> {
    src_first: Fixer<T>,
    dst_first: Fixer<T>,
    consumer: ConsumerGroup,
    timeout: Duration,
    options: ConsumerOptions,
    counters: FixCounters,
}

impl<T: Entity> FixConsumer<T> {
    /// Repair `src` and `dst` from events delivered to `consumer`
    pub fn new(
        src: Arc<dyn RowStore<T>>,
        dst: Arc<dyn RowStore<T>>,
        consumer: ConsumerGroup,
        config: &FixerConfig,
    ) -> Self {
        Self {
            src_first: Fixer::new(Arc::clone(&src), Arc::clone(&dst)),
            dst_first: Fixer::new(dst, src),
            consumer,
            timeout: config.timeout(),
            options: config.consumer_options(),
            counters: FixCounters::default(),
        }
    }

    /// Underlying consumer group
    pub fn consumer(&self) -> &ConsumerGroup {
        &self.consumer
    }

    /// Repairs so far
    pub fn stats(&self) -> FixStats {
        FixStats {
            upserted: self.counters.upserted.load(Ordering::Relaxed),
            deleted: self.counters.deleted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Counters and lag, with `running` as reported by the owner
    pub fn status(&self, running: bool) -> FixerStatus {
        FixerStatus {
            running,
            lag: self.consumer.lag(),
            stats: self.stats(),
        }
    }

    /// Fixer trusted for events carrying `direction`
    pub fn fixer_for(&self, direction: Direction) -> &Fixer<T> {
        match direction {
            Direction::Src => &self.src_first,
            Direction::Dst => &self.dst_first,
        }
    }

    /// Repair the row `event` reports
    pub fn consume(&self, event: &InconsistencyEvent) -> Result<FixOutcome> {
        let ctx = OpContext::detached(self.timeout);
        let outcome = self.fixer_for(event.direction).fix_event(&ctx, event);
        match &outcome {
            Ok(FixOutcome::Upserted) => {
                self.counters.upserted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(FixOutcome::Deleted) => {
                self.counters.deleted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    fn handle(&self, msg: &Message, event: InconsistencyEvent) -> Result<()> {
        let outcome = self.consume(&event)?;
        debug!(
            partition = msg.partition,
            offset = msg.offset,
            id = event.id,
            direction = event.direction.as_str(),
            kind = event.kind.as_str(),
            outcome = ?outcome,
            "inconsistency repaired"
        );
        Ok(())
    }

    /// Consume on the calling thread until `cancel` fires
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let handler = JsonHandler::new(|msg: &Message, event: InconsistencyEvent| {
            self.handle(msg, event)
        });
        self.consumer.run(&handler, cancel, self.options)
    }

    /// Consume on a dedicated thread until `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(self: Arc<Self>, cancel: CancelToken) -> Result<JoinHandle<Result<()>>> {
        let name = format!("dualwrite-fix-{}", self.consumer.group());
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let result = self.run(&cancel);
                if let Err(e) = &result {
                    error!(group = %self.consumer.group(), error = %e, "repair consumer failed");
                }
                result
            })
            .map_err(Error::IoError)
    }
}

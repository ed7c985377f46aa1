//! Consumer groups
//!
//! A `ConsumerGroup` reads a topic on behalf of one member of a named group.
//! Partitions are assigned statically: member `m` of `n` owns every
//! partition `p` with `p % n == m`.
//!
//! Delivery is at-least-once. Each member keeps an in-memory read position
//! per partition, starting at the group's committed offset. The committed
//! offset only moves forward when [`ConsumerGroup::commit`] is called after
//! a message has been handled, so a crash between handling and commit
//! redelivers the message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dualwrite_core::{CancelToken, Error, OpContext, Result};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::handler::Handler;
use crate::offsets::OffsetStore;
use crate::topic::{Message, Topic};

/// Settings for [`ConsumerGroup::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// How long one poll waits for new messages
    pub poll_interval: Duration,
    /// Maximum messages returned by one poll
    pub max_poll_records: usize,
    /// Commit past a message whose handler failed
    pub commit_on_error: bool,
    /// Release messages every group has committed past after each batch
    pub release_committed: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_poll_records: 64,
            commit_on_error: true,
            release_committed: false,
        }
    }
}

/// One member of a consumer group on one topic
pub struct ConsumerGroup {
    group: String,
    topic: Arc<Topic>,
    offsets: Arc<OffsetStore>,
    assigned: Vec<u32>,
    positions: Mutex<HashMap<u32, u64>>,
}

impl ConsumerGroup {
    /// Join `group` as the only member (all partitions assigned)
    pub fn new(topic: Arc<Topic>, offsets: Arc<OffsetStore>, group: impl Into<String>) -> Result<Self> {
        Self::join(topic, offsets, group, 0, 1)
    }

    /// Join `group` as member `member_id` of `member_count`
    pub fn join(
        topic: Arc<Topic>,
        offsets: Arc<OffsetStore>,
        group: impl Into<String>,
        member_id: u32,
        member_count: u32,
    ) -> Result<Self> {
        if member_count == 0 || member_id >= member_count {
            return Err(Error::InvalidOperation(format!(
                "member {} of {} is not a valid assignment",
                member_id, member_count
            )));
        }
        let group = group.into();
        if group.is_empty() {
            return Err(Error::InvalidOperation(
                "consumer group name must not be empty".to_string(),
            ));
        }

        let assigned: Vec<u32> = (0..topic.partition_count())
            .filter(|p| p % member_count == member_id)
            .collect();
        let positions = assigned
            .iter()
            .map(|&p| (p, offsets.committed(&group, p).unwrap_or(0)))
            .collect();

        debug!(group = %group, topic = %topic.name(), ?assigned, "joined consumer group");

        Ok(Self {
            group,
            topic,
            offsets,
            assigned,
            positions: Mutex::new(positions),
        })
    }

    /// Group name
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Partitions owned by this member
    pub fn assigned_partitions(&self) -> &[u32] {
        &self.assigned
    }

    /// Fetch up to `max` messages, waiting up to `wait` if none are ready.
    ///
    /// Messages are taken round-robin across the assigned partitions and
    /// the read position advances past every returned message.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` / `DeadlineExceeded` when `ctx` is done.
    pub fn poll(&self, ctx: &OpContext, max: usize, wait: Duration) -> Result<Vec<Message>> {
        ctx.check()?;
        let batch = self.fetch(max)?;
        if !batch.is_empty() || wait.is_zero() {
            return Ok(batch);
        }

        let wait = match ctx.remaining() {
            Some(left) if left < wait => left,
            _ => wait,
        };
        let positions: Vec<(u32, u64)> = {
            let guard = self.positions.lock();
            guard.iter().map(|(&p, &o)| (p, o)).collect()
        };
        self.topic
            .wait_for_data(&positions, wait, ctx.cancel_token());
        ctx.check()?;
        self.fetch(max)
    }

    fn fetch(&self, max: usize) -> Result<Vec<Message>> {
        let mut positions = self.positions.lock();
        let mut batch = Vec::new();
        if max == 0 || self.assigned.is_empty() {
            return Ok(batch);
        }

        // Fair share per partition, then top up from whoever has more
        let share = (max / self.assigned.len()).max(1);
        for round_max in [share, max] {
            for &partition in &self.assigned {
                let room = max - batch.len();
                if room == 0 {
                    return Ok(batch);
                }
                let position = positions.get(&partition).copied().unwrap_or(0);
                let msgs = self
                    .topic
                    .read(partition, position, round_max.min(room))?;
                if let Some(last) = msgs.last() {
                    positions.insert(partition, last.offset + 1);
                }
                batch.extend(msgs);
            }
        }
        Ok(batch)
    }

    /// Mark `msg` as handled: the group will next read the offset after it
    pub fn commit(&self, msg: &Message) -> Result<()> {
        let next = msg.offset + 1;
        match self.offsets.committed(&self.group, msg.partition) {
            Some(current) if current >= next => Ok(()),
            _ => self.offsets.commit(&self.group, msg.partition, next),
        }
    }

    /// Drop messages from the topic that every group committed past
    ///
    /// Only partitions assigned to this member are released. A group that
    /// never committed on a partition does not hold messages back; when it
    /// joins later it starts at the oldest message still retained.
    pub fn release_committed(&self) -> Result<usize> {
        let mut dropped = 0;
        for &partition in &self.assigned {
            if let Some(floor) = self.offsets.min_committed(partition) {
                dropped += self.topic.release(partition, floor)?;
            }
        }
        Ok(dropped)
    }

    /// Move the read position of `partition` to `offset`
    pub fn seek(&self, partition: u32, offset: u64) -> Result<()> {
        if !self.assigned.contains(&partition) {
            return Err(Error::InvalidOperation(format!(
                "partition {} is not assigned to this member of group {}",
                partition, self.group
            )));
        }
        self.positions.lock().insert(partition, offset);
        Ok(())
    }

    /// Committed offset of `partition`, if any
    pub fn committed(&self, partition: u32) -> Option<u64> {
        self.offsets.committed(&self.group, partition)
    }

    /// Messages published but not yet committed across assigned partitions
    ///
    /// Messages released before the group ever committed are not counted.
    pub fn lag(&self) -> u64 {
        self.assigned
            .iter()
            .map(|&p| {
                let end = self.topic.end_offset(p);
                let from = self
                    .committed(p)
                    .unwrap_or(0)
                    .max(self.topic.start_offset(p));
                end.saturating_sub(from)
            })
            .sum()
    }

    /// Consume until `cancel` fires.
    ///
    /// Every message goes to `handler`. Handler failures are logged; the
    /// offset is then committed anyway, or with `commit_on_error = false`
    /// the partition is rewound so the message is delivered again on the
    /// next poll.
    pub fn run(&self, handler: &dyn Handler, cancel: &CancelToken, opts: ConsumerOptions) -> Result<()> {
        info!(group = %self.group, topic = %self.topic.name(), "consumer started");
        let ctx = OpContext::with_cancel(cancel);

        while !cancel.is_cancelled() {
            let batch = match self.poll(&ctx, opts.max_poll_records, opts.poll_interval) {
                Ok(batch) => batch,
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    error!(group = %self.group, error = %e, "poll failed");
                    cancel.sleep(opts.poll_interval);
                    continue;
                }
            };

            let mut rewound: Vec<u32> = Vec::new();
            for msg in &batch {
                if rewound.contains(&msg.partition) {
                    continue;
                }
                match handler.handle(msg) {
                    Ok(()) => self.commit_logged(msg),
                    Err(e) => {
                        error!(
                            group = %self.group,
                            partition = msg.partition,
                            offset = msg.offset,
                            key = msg.key,
                            error = %e,
                            "handler failed"
                        );
                        if opts.commit_on_error {
                            self.commit_logged(msg);
                        } else {
                            self.seek(msg.partition, msg.offset)?;
                            rewound.push(msg.partition);
                        }
                    }
                }
            }

            if opts.release_committed && !batch.is_empty() {
                if let Err(e) = self.release_committed() {
                    warn!(group = %self.group, error = %e, "releasing handled messages failed");
                }
            }

            // Back off before redelivering on a rewound partition
            if !rewound.is_empty() {
                cancel.sleep(opts.poll_interval);
            }
        }

        info!(group = %self.group, "consumer stopped");
        Ok(())
    }

    fn commit_logged(&self, msg: &Message) {
        if let Err(e) = self.commit(msg) {
            warn!(
                group = %self.group,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "offset commit failed"
            );
        }
    }
}

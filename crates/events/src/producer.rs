//! Publishing inconsistency events

use std::sync::Arc;

use dualwrite_core::{InconsistencyEvent, OpContext, Result};
use tracing::debug;

use crate::topic::Topic;

/// Publishes inconsistency reports
///
/// Failures are returned to the caller; the producer never retries.
pub trait Producer: Send + Sync {
    /// Serialize and publish one event
    fn produce_inconsistent_event(&self, ctx: &OpContext, event: &InconsistencyEvent) -> Result<()>;
}

/// Producer writing JSON-encoded events to a [`Topic`], keyed by row id
#[derive(Debug, Clone)]
pub struct TopicProducer {
    topic: Arc<Topic>,
}

impl TopicProducer {
    /// Publish to `topic`
    pub fn new(topic: Arc<Topic>) -> Self {
        Self { topic }
    }

    /// Target topic
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }
}

impl Producer for TopicProducer {
    fn produce_inconsistent_event(&self, ctx: &OpContext, event: &InconsistencyEvent) -> Result<()> {
        let payload = event.to_json()?;
        let (partition, offset) = self.topic.append(ctx, event.id, payload)?;
        debug!(
            topic = %self.topic.name(),
            id = event.id,
            direction = event.direction.as_str(),
            kind = event.kind.as_str(),
            partition,
            offset,
            "published inconsistency event"
        );
        Ok(())
    }
}

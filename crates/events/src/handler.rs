//! Message handlers
//!
//! A [`Handler`] processes one delivered message. The consumer loop logs
//! handler errors and then commits (or seeks back), so a handler only
//! reports whether its work succeeded.

use std::marker::PhantomData;

use dualwrite_core::Result;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::topic::Message;

/// Processes delivered messages
pub trait Handler: Send + Sync {
    /// Handle one message
    fn handle(&self, msg: &Message) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn handle(&self, msg: &Message) -> Result<()> {
        self(msg)
    }
}

/// Handler that decodes the payload as JSON before calling `f`
///
/// Payloads that fail to decode are logged and reported as handled, so the
/// consumer commits past them instead of redelivering them forever.
pub struct JsonHandler<E, F> {
    f: F,
    _event: PhantomData<fn() -> E>,
}

impl<E, F> JsonHandler<E, F>
where
    E: DeserializeOwned,
    F: Fn(&Message, E) -> Result<()> + Send + Sync,
{
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> Handler for JsonHandler<E, F>
where
    E: DeserializeOwned,
    F: Fn(&Message, E) -> Result<()> + Send + Sync,
{
    fn handle(&self, msg: &Message) -> Result<()> {
        match serde_json::from_slice::<E>(&msg.payload) {
            Ok(event) => (self.f)(msg, event),
            Err(e) => {
                error!(
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "skipping undecodable message"
                );
                Ok(())
            }
        }
    }
}

//! Deadlines and cancellation for blocking operations
//!
//! Every store read/write, every channel publish/poll and every validator
//! sleep takes an [`OpContext`]. The context carries:
//!
//! - an optional deadline, so a stalled store cannot hang the caller
//! - an optional [`CancelToken`], so long-running loops stop promptly
//!
//! Per-row work started by a loop uses [`OpContext::detached`]: it gets its
//! own short deadline and ignores the loop's cancellation, so a write that
//! has begun is allowed to finish.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

struct TokenInner {
    cancelled: AtomicBool,
    /// Children to cancel with us; also the mutex `cond` waits on
    children: Mutex<Vec<Weak<TokenInner>>>,
    cond: Condvar,
}

/// Cooperative cancellation signal.
///
/// Cloning shares the signal. [`CancelToken::child`] creates a token that is
/// cancelled together with its parent but can also be cancelled on its own.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Create a token cancelled whenever `self` is
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.retain(|w| w.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = {
            let mut guard = self.inner.children.lock();
            self.inner.cond.notify_all();
            std::mem::take(&mut *guard)
        };
        for child in children.into_iter().filter_map(|w| w.upgrade()) {
            CancelToken { inner: child }.cancel();
        }
    }

    /// Whether the signal has fired
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Block for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.children.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            self.inner.cond.wait_until(&mut guard, deadline);
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Deadline and cancellation scope for one operation
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl OpContext {
    /// No deadline, never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    /// Fresh context with only a deadline `timeout` from now
    pub fn detached(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Context bound to a cancellation token
    pub fn with_cancel(token: &CancelToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(token.clone()),
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancellation token, if any
    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// `Err(Cancelled)` or `Err(DeadlineExceeded)` once the context is done
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().map_or(false, |c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Whether [`check`](Self::check) would fail
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Sleep for `duration`, cut short by the deadline or cancellation.
    ///
    /// Used to model latency; fails with the reason the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        let budget = match self.remaining() {
            Some(left) if left < duration => left,
            _ => duration,
        };
        let completed = match &self.cancel {
            Some(token) => token.sleep(budget),
            None => {
                std::thread::sleep(budget);
                true
            }
        };
        if !completed {
            return Err(Error::Cancelled);
        }
        if budget < duration {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}

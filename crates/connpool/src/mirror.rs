//! Best-effort secondary worker.
//!
//! The connector answers the caller from the authoritative store and hands the
//! secondary write (or shadow read) to a `Mirror`. A single worker thread runs
//! jobs in FIFO order, so secondary writes reach the other store in the order
//! the authoritative store accepted them.
//!
//! The queue is bounded: when it is full the job is rejected and the caller
//! logs the dropped write. The validator picks up anything lost this way.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use dualwrite_core::{Error, Result};
use tracing::error;

/// Mirror metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Jobs waiting in the queue.
    pub queue_depth: usize,
    /// Jobs currently running (0 or 1).
    pub active_jobs: usize,
    /// Jobs finished since creation, including panicked ones.
    pub jobs_completed: u64,
    /// Jobs that panicked.
    pub jobs_panicked: u64,
    /// Jobs rejected because the queue was full or the mirror shut down.
    pub jobs_rejected: u64,
}

type Job = Box<dyn FnOnce() + Send>;

struct MirrorInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_jobs: AtomicUsize,
    max_queue_depth: usize,
    jobs_completed: AtomicU64,
    jobs_panicked: AtomicU64,
    jobs_rejected: AtomicU64,
}

/// Single-threaded FIFO job runner with a bounded queue.
pub struct Mirror {
    inner: Arc<MirrorInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Mirror {
    /// Start a mirror whose worker thread is named `dualwrite-mirror-{name}`.
    pub fn new(name: &str, max_queue_depth: usize) -> Result<Self> {
        let inner = Arc::new(MirrorInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            max_queue_depth,
            jobs_completed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(format!("dualwrite-mirror-{}", name))
            .spawn(move || worker_loop(&inner_clone))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job.
    ///
    /// Returns `Err(Backpressure)` if the queue is at capacity or the mirror
    /// has been shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.jobs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Backpressure("mirror is shut down".to_string()));
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                drop(queue);
                self.inner.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Backpressure(format!(
                    "mirror queue at capacity ({})",
                    self.inner.max_queue_depth
                )));
            }
            queue.push_back(Box::new(job));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until every queued and running job has finished.
    ///
    /// The worker keeps running afterwards.
    pub fn flush(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_jobs.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting jobs, run what is queued, and join the worker.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Notify under the queue lock so a worker about to wait cannot miss it
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Return a snapshot of mirror metrics.
    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.inner.jobs_panicked.load(Ordering::Relaxed),
            jobs_rejected: self.inner.jobs_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_jobs` and wakes flush waiters even if the job panics.
struct ActiveJobGuard<'a> {
    inner: &'a MirrorInner,
}

impl<'a> Drop for ActiveJobGuard<'a> {
    fn drop(&mut self) {
        self.inner.active_jobs.fetch_sub(1, Ordering::Release);
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);

        if self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &MirrorInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_jobs.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            inner.jobs_panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                "mirror job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_flush() {
        let mirror = Mirror::new("test", 4096).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let c = Arc::clone(&counter);
            mirror
                .submit(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        mirror.flush();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(mirror.stats().jobs_completed, 10);
    }

    #[test]
    fn test_fifo_order() {
        let mirror = Mirror::new("fifo", 4096).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let o = Arc::clone(&order);
            mirror.submit(move || o.lock().push(i)).unwrap();
        }
        mirror.flush();
        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_backpressure_when_full() {
        let mirror = Mirror::new("full", 2).unwrap();

        // Block the worker so the queue fills up
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        mirror.submit(move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        mirror.submit(|| {}).unwrap();
        mirror.submit(|| {}).unwrap();
        let err = mirror.submit(|| {}).unwrap_err();
        assert!(matches!(err, Error::Backpressure(_)));
        assert_eq!(mirror.stats().jobs_rejected, 1);

        barrier.wait();
        mirror.flush();
        assert_eq!(mirror.stats().queue_depth, 0);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let mirror = Mirror::new("panic", 16).unwrap();
        mirror.submit(|| panic!("boom")).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        mirror.submit(move || r.store(true, Ordering::Release)).unwrap();
        mirror.flush();

        assert!(ran.load(Ordering::Acquire));
        let stats = mirror.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert_eq!(stats.jobs_completed, 2);
    }

    #[test]
    fn test_shutdown_runs_queued_jobs_then_rejects() {
        let mirror = Mirror::new("shutdown", 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            mirror
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        mirror.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert!(mirror.submit(|| {}).is_err());

        // Second shutdown is a no-op
        mirror.shutdown();
    }

    #[test]
    fn test_flush_on_idle_returns() {
        let mirror = Mirror::new("idle", 16).unwrap();
        mirror.flush();
    }
}

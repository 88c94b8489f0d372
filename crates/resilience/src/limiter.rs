// crates/resilience/src/limiter.rs
//! Concurrency limiter
//!
//! A pure gate: bounds how many tasks run at once and starts queued tasks in
//! submission order. It knows nothing about failures, timeouts or priority.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum tasks in flight; values below 1 are treated as 1
    pub concurrency: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Bounds the number of concurrently running tasks
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    // tokio's semaphore hands permits to waiters in FIFO order
    semaphore: Semaphore,
    concurrency: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
}

impl Limiter {
    /// Creates a limiter allowing `concurrency` tasks at once
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(LimiterInner {
                semaphore: Semaphore::new(concurrency),
                concurrency,
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates a limiter from its configuration record
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.concurrency)
    }

    /// Returns the concurrency bound
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Returns the number of tasks currently running
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Runs `task` once a slot is free and returns its output unchanged.
    ///
    /// The task joins the queue when the returned future is first polled.
    /// Its slot is released when it settles, whether it succeeded or failed.
    pub async fn run<F, Fut>(&self, task: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let queued = Gauge::enter(&self.inner.queued);
        log::trace!("Limiter: {} active, {} queued", self.active(), self.queued());
        // The semaphore is never closed, so acquiring always yields a permit
        let _permit = self.inner.semaphore.acquire().await.ok();
        drop(queued);

        let _active = Gauge::enter(&self.inner.active);
        task().await
    }

    /// Runs every task under the limit and returns their outputs in
    /// submission order.
    pub async fn run_all<I, F, Fut>(&self, tasks: I) -> Vec<Fut::Output>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        join_all(tasks.into_iter().map(|task| self.run(task))).await
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::from_config(&LimiterConfig::default())
    }
}

/// Counts itself in on creation and out on drop
struct Gauge<'a>(&'a AtomicUsize);

impl<'a> Gauge<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

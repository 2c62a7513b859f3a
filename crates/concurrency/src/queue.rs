//! Serial job queue
//!
//! Jobs are futures. They run strictly in submission order, one at a time,
//! each on its own Tokio task. A queue created with [`SerialQueue::frozen`]
//! accepts jobs but does not start any until [`SerialQueue::thaw`] is called.
//!
//! ## Guarantees
//!
//! - FIFO: job N+1 starts only after job N has completed.
//! - No re-entrancy: `add` never runs a job on the caller's stack, even on an
//!   idle queue.
//! - Fire and forget: dropping the future returned by [`SerialQueue::run`]
//!   does not cancel the job.
//! - A panicking job is logged and skipped; the queue keeps draining.
//!
//! A job must not await another job of the same queue: the inner job cannot
//! start until the outer one finishes.
//!
//! All methods that start work (`add`, `run`, `thaw`) must be called from
//! inside a Tokio runtime.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tessera_core::{Error, Result};
use tokio::sync::oneshot;
use tracing::{trace, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// A driver task is currently draining `jobs`
    running: bool,
    frozen: bool,
}

/// Async FIFO executing one job at a time
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct SerialQueue {
    state: Arc<Mutex<QueueState>>,
}

impl SerialQueue {
    /// Create an idle queue that starts jobs as they arrive
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Create a queue that holds jobs until [`thaw`](Self::thaw)
    pub fn frozen() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                frozen: true,
                ..QueueState::default()
            })),
        }
    }

    /// Enqueue a job without waiting for it
    pub fn add<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let start = {
            let mut state = self.state.lock();
            state.jobs.push_back(Box::pin(job));
            if !state.running && !state.frozen {
                state.running = true;
                true
            } else {
                false
            }
        };
        if start {
            self.spawn_driver();
        }
    }

    /// Enqueue a job and wait for its output
    ///
    /// The job is enqueued immediately, before the returned future is first
    /// polled. Resolves to [`Error::QueueClosed`] if the job panicked.
    pub fn run<F, T>(&self, job: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.add(async move {
            let output = job.await;
            // Receiver may be gone; the job still counts as done.
            let _ = tx.send(output);
        });
        async move { rx.await.map_err(|_| Error::QueueClosed) }
    }

    /// Release a frozen queue; pending jobs start in order
    ///
    /// Thawing a queue that is not frozen does nothing.
    pub fn thaw(&self) {
        let start = {
            let mut state = self.state.lock();
            if !state.frozen {
                return;
            }
            state.frozen = false;
            if !state.running && !state.jobs.is_empty() {
                state.running = true;
                true
            } else {
                false
            }
        };
        if start {
            self.spawn_driver();
        }
    }

    /// Whether the queue is holding its jobs
    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    /// Jobs enqueued but not yet started
    pub fn pending(&self) -> usize {
        self.state.lock().jobs.len()
    }

    fn spawn_driver(&self) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = state.lock();
                    match guard.jobs.pop_front() {
                        Some(job) => job,
                        None => {
                            guard.running = false;
                            return;
                        }
                    }
                };
                trace!("Running queued job");
                if let Err(e) = tokio::spawn(job).await {
                    warn!(error = %e, "Queued job did not complete");
                }
            }
        });
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SerialQueue")
            .field("pending", &state.jobs.len())
            .field("running", &state.running)
            .field("frozen", &state.frozen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = SerialQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let log = Arc::clone(&log);
            queue.add(async move {
                // Earlier jobs sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                log.lock().push(i);
            });
        }
        queue.run(async {}).await.unwrap();

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_one_job_at_a_time() {
        let queue = SerialQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            queue.add(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        queue.run(async {}).await.unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_never_runs_job_inline() {
        let queue = SerialQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        queue.add(async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!ran.load(Ordering::SeqCst), "job must not run on the caller's stack");

        queue.run(async {}).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_frozen_queue_holds_jobs_until_thaw() {
        let queue = SerialQueue::frozen();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let done = queue.run(async move {
            flag.store(true, Ordering::SeqCst);
            7
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(queue.is_frozen());
        assert_eq!(queue.pending(), 1);

        queue.thaw();
        assert_eq!(done.await.unwrap(), 7);
        assert!(!queue.is_frozen());
    }

    #[tokio::test]
    async fn test_thaw_twice_is_noop() {
        let queue = SerialQueue::frozen();
        queue.thaw();
        queue.thaw();
        assert_eq!(queue.run(async { 1 }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_job() {
        let queue = SerialQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        drop(queue.run(async move {
            flag.store(true, Ordering::SeqCst);
        }));

        queue.run(async {}).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stall_queue() {
        let queue = SerialQueue::new();
        let failed = queue.run(async {
            panic!("job failure");
        });
        let next = queue.run(async { "after" });

        assert!(matches!(failed.await, Err(Error::QueueClosed)));
        assert_eq!(next.await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_queue_restarts_after_draining() {
        let queue = SerialQueue::new();
        assert_eq!(queue.run(async { 1 }).await.unwrap(), 1);
        tokio::task::yield_now().await;
        assert_eq!(queue.run(async { 2 }).await.unwrap(), 2);
        assert_eq!(queue.pending(), 0);
    }
}

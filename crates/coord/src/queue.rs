//! Delayed background job execution with bounded concurrency.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use recall_core::Error;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

/// A unit of background work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Accepts jobs to run after a delay.
pub trait JobQueue: Send + Sync {
    /// Queue `job` to start once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobQueueClosed`] when the queue no longer accepts work.
    fn enqueue(&self, job: Job, delay: Duration) -> Result<(), Error>;
}

/// Runs jobs on the tokio runtime, at most `workers` at a time.
///
/// Jobs waiting for a worker when the pool is closed are dropped unstarted.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for zero workers or when called
    /// outside a tokio runtime.
    pub fn new(workers: usize) -> Result<Self, Error> {
        if workers == 0 {
            return Err(Error::InvalidInput("worker pool needs at least one worker".into()));
        }
        let handle = Handle::try_current().map_err(|e| Error::InvalidInput(format!("no tokio runtime: {e}")))?;

        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        })
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop accepting jobs. Running jobs finish; waiting ones are dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the pool and wait up to `grace` for running jobs.
    ///
    /// Returns `false` when jobs were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.close();
        let drained = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        if drained {
            tracing::info!("worker pool drained");
        } else {
            tracing::warn!(pending = self.pending(), "worker pool shutdown timed out");
        }
        drained
    }
}

/// Decrements the pending count however the job task ends.
struct PendingSlot {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl JobQueue for WorkerPool {
    fn enqueue(&self, job: Job, delay: Duration) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::JobQueueClosed("worker pool is closed".into()));
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let slot = PendingSlot { pending: self.pending.clone(), idle: self.idle.clone() };
        let permits = self.permits.clone();

        self.handle.spawn(async move {
            let _slot = slot;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::debug!("worker pool closed; dropping queued job");
                return;
            };
            job.await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_runs_job_after_delay() {
        let pool = WorkerPool::new(2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let counter = ran.clone();
        pool.enqueue(
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(100),
        )
        .unwrap();

        pool.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounded_concurrency() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.enqueue(
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }),
                Duration::ZERO,
            )
            .unwrap();
        }

        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_jobs() {
        let pool = WorkerPool::new(1).unwrap();
        pool.close();
        let result = pool.enqueue(Box::pin(async {}), Duration::ZERO);
        assert!(matches!(result, Err(Error::JobQueueClosed(_))));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_wedge_pool() {
        let pool = WorkerPool::new(1).unwrap();
        let explode = true;
        pool.enqueue(
            Box::pin(async move {
                if explode {
                    panic!("job blew up");
                }
            }),
            Duration::ZERO,
        )
        .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        pool.enqueue(
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::ZERO,
        )
        .unwrap();

        pool.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_waiting_jobs() {
        let pool = WorkerPool::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        pool.enqueue(
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(pool.shutdown(Duration::from_secs(2)).await);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(WorkerPool::new(1), Err(Error::InvalidInput(_))));
    }
}

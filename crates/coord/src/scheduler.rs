//! Fire-and-forget generation for keys that are not cached yet.

use std::sync::Arc;
use std::time::Duration;

use recall_core::store::keys;
use recall_core::{Error, RequestContext};
use serde::Serialize;
use tracing::Instrument;

use crate::dedup::{JobDeduplicator, MarkerGuard};
use crate::producer::Producer;
use crate::queue::JobQueue;
use crate::tiered::TieredCache;

/// What [`AsyncScheduler::schedule_if_absent`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// A successful result is already cached; nothing was queued.
    AlreadyCached,
    /// A job for the same producer and key is queued or running.
    AlreadyScheduled,
    /// A new job was queued.
    Scheduled,
}

impl ScheduleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleOutcome::AlreadyCached => "already_cached",
            ScheduleOutcome::AlreadyScheduled => "already_scheduled",
            ScheduleOutcome::Scheduled => "scheduled",
        }
    }
}

/// Queues producer runs for uncached keys, at most one per job key.
#[derive(Clone)]
pub struct AsyncScheduler {
    cache: TieredCache,
    dedup: JobDeduplicator,
    queue: Arc<dyn JobQueue>,
    delay: Duration,
}

impl std::fmt::Debug for AsyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncScheduler")
            .field("cache", &self.cache)
            .field("dedup", &self.dedup)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl AsyncScheduler {
    pub fn new(cache: TieredCache, dedup: JobDeduplicator, queue: Arc<dyn JobQueue>, delay: Duration) -> Self {
        Self { cache, dedup, queue, delay }
    }

    /// Queue `producer` for `key` unless a result is cached or a job is
    /// already in flight.
    ///
    /// The job writes a successful result through the tiered cache; failures
    /// are logged and dropped. The job marker is released however the job
    /// ends, so a later call can retry.
    pub async fn schedule_if_absent(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        producer: Arc<dyn Producer>,
    ) -> Result<ScheduleOutcome, Error> {
        keys::validate_namespace(namespace)?;

        if self.cache.contains(namespace, key).await? {
            tracing::debug!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, "already cached");
            return Ok(ScheduleOutcome::AlreadyCached);
        }

        let job_key = keys::job_key(producer.identity(), key);
        let scheduled = self
            .dedup
            .try_schedule(&job_key, |guard| {
                let job = run_job(self.cache.clone(), ctx.clone(), namespace.to_string(), key.to_string(), producer, guard);
                self.queue.enqueue(Box::pin(job), self.delay)
            })
            .await?;

        if scheduled {
            tracing::info!(
                request_id = %ctx.request_id(),
                namespace = %namespace,
                key = %key,
                job_key = %job_key,
                delay_ms = self.delay.as_millis() as u64,
                "job scheduled"
            );
            Ok(ScheduleOutcome::Scheduled)
        } else {
            Ok(ScheduleOutcome::AlreadyScheduled)
        }
    }
}

async fn run_job(
    cache: TieredCache,
    ctx: RequestContext,
    namespace: String,
    key: String,
    producer: Arc<dyn Producer>,
    guard: MarkerGuard,
) {
    let span = ctx.span();
    async move {
        // Run on its own task so a panicking producer still reaches cleanup.
        let produced = {
            let ctx = ctx.clone();
            let key = key.clone();
            let producer = producer.clone();
            tokio::spawn(async move { producer.produce(&ctx, &key).await }).await
        };

        match produced {
            Ok(Ok(result)) if result.is_cacheable() => {
                if let Some(data) = result.into_data() {
                    match cache.write(&ctx, &namespace, &key, data).await {
                        Ok(()) => tracing::info!(namespace = %namespace, key = %key, producer = %producer.identity(), "job stored result"),
                        Err(e) => tracing::error!(namespace = %namespace, key = %key, error = %e, "job failed to store result"),
                    }
                }
            }
            Ok(Ok(result)) => {
                tracing::warn!(namespace = %namespace, key = %key, error = %result.error_message(), "producer failed; nothing stored");
            }
            Ok(Err(e)) => {
                tracing::warn!(namespace = %namespace, key = %key, error = %e, "producer raised; nothing stored");
            }
            Err(e) => {
                tracing::error!(namespace = %namespace, key = %key, error = %e, "producer task aborted");
            }
        }

        if let Err(e) = guard.complete().await {
            tracing::warn!(job_key = %keys::job_key(producer.identity(), &key), error = %e, "marker release failed; it will expire");
        }
    }
    .instrument(span)
    .await
}

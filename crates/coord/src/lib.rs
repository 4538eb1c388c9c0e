//! Coordination layer for recall.
//!
//! Builds on the stores in `recall-core`:
//! - [`TieredCache`]: read/write-through cache, ephemeral tier over durable
//! - [`JobDeduplicator`]: at most one queued or running job per job key
//! - [`DistributedLock`]: TTL-bounded mutual exclusion with owner tokens
//! - [`AsyncScheduler`]: deduplicated, delayed background generation
//! - [`SearchIndex`]: weighted text search over a durable namespace

pub mod dedup;
pub mod lock;
pub mod producer;
pub mod queue;
pub mod scheduler;
pub mod search;
pub mod tiered;

use std::sync::Arc;

pub use dedup::{JobDeduplicator, MarkerGuard};
pub use lock::{BUSY, DistributedLock, LockToken, Locked};
pub use producer::{CommandProducer, FnProducer, Producer};
pub use queue::{Job, JobQueue, WorkerPool};
pub use scheduler::{AsyncScheduler, ScheduleOutcome};
pub use search::SearchIndex;
pub use tiered::{FetchOutcome, FetchSource, TieredCache};

use recall_core::{AppConfig, EphemeralStore, Error, Stores};

/// Every coordination component wired to one set of stores.
#[derive(Clone)]
pub struct Coordinator {
    pub cache: TieredCache,
    pub dedup: JobDeduplicator,
    pub lock: DistributedLock,
    pub scheduler: AsyncScheduler,
    pub search: SearchIndex,
    pub pool: WorkerPool,
    coordination: Arc<dyn EphemeralStore>,
    shared_ephemeral: bool,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("cache", &self.cache)
            .field("lock", &self.lock)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Build the components from configuration. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid search weights or when no runtime is available.
    pub fn new(config: &AppConfig, stores: &Stores) -> Result<Self, Error> {
        let cache = TieredCache::from_stores(stores, config.ephemeral_ttl());
        // Locks and markers live apart from the mirrors, whose store may evict.
        let dedup = JobDeduplicator::new(stores.coordination.clone(), config.job_marker_ttl());
        let lock = DistributedLock::new(stores.coordination.clone(), config.lock_category.clone(), config.lock_ttl());

        let pool = WorkerPool::new(config.worker_count)?;
        let scheduler =
            AsyncScheduler::new(cache.clone(), dedup.clone(), Arc::new(pool.clone()), config.schedule_delay());

        let weights = config.field_weights().map_err(|e| Error::InvalidInput(e.to_string()))?;
        let search = SearchIndex::new(stores.durable.clone(), config.search_namespace.clone(), weights)?;

        tracing::debug!(
            workers = config.worker_count,
            lock_category = %config.lock_category,
            search_namespace = %config.search_namespace,
            "coordinator ready"
        );

        Ok(Self {
            cache,
            dedup,
            lock,
            scheduler,
            search,
            pool,
            coordination: stores.coordination.clone(),
            shared_ephemeral: Arc::ptr_eq(&stores.ephemeral, &stores.coordination),
        })
    }

    /// Drop expired mirrors, job markers and locks. Returns how many went.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let mut purged = self.cache.ephemeral().purge_expired().await?;
        if !self.shared_ephemeral {
            purged += self.coordination.purge_expired().await?;
        }
        Ok(purged)
    }
}

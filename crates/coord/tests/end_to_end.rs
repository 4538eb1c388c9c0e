//! Integration tests across the cache, scheduler, lock and search.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use recall_coord::{
    AsyncScheduler, DistributedLock, FetchSource, FnProducer, JobDeduplicator, Locked, Producer, ScheduleOutcome,
    SearchIndex, TieredCache, WorkerPool,
};
use recall_core::{
    DurableStore, EphemeralStore, Error, FieldWeights, MemoryStore, RequestContext, SearchHit, SqliteStore,
    TaggedResult, TextQuery,
};
use serde_json::{Value, json};

const TTL: Duration = Duration::from_secs(60);

/// Durable store that can be switched into a failing state.
struct FlakyDurable {
    inner: SqliteStore,
    down: AtomicBool,
}

impl FlakyDurable {
    async fn new() -> Arc<Self> {
        Arc::new(Self { inner: SqliteStore::open_in_memory().await.unwrap(), down: AtomicBool::new(false) })
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), Error> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("durable store is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for FlakyDurable {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, Error> {
        self.check()?;
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), Error> {
        self.check()?;
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        self.check()?;
        self.inner.delete(namespace, key).await
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        self.check()?;
        self.inner.exists(namespace, key).await
    }

    async fn ensure_text_index(&self, namespace: &str, weights: &FieldWeights) -> Result<bool, Error> {
        self.check()?;
        self.inner.ensure_text_index(namespace, weights).await
    }

    async fn text_search(&self, namespace: &str, query: &TextQuery) -> Result<Vec<SearchHit>, Error> {
        self.check()?;
        self.inner.text_search(namespace, query).await
    }
}

#[tokio::test]
async fn test_second_fetch_served_from_ephemeral_tier() {
    let durable = FlakyDurable::new().await;
    let ephemeral = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(durable.clone(), ephemeral.clone(), TTL);
    let ctx = RequestContext::new();

    let first = cache
        .fetch_with(&ctx, "videos", "v1", TTL, || async { Ok(TaggedResult::ok(json!({"title": "X"}))) })
        .await
        .unwrap();
    assert_eq!(first.source(), Some(FetchSource::Producer));

    let stored = json!({"success": true, "data": {"title": "X"}});
    assert_eq!(durable.inner.get("videos", "v1").await.unwrap(), Some(stored.clone()));
    assert_eq!(ephemeral.get("cache:videos:v1").await.unwrap(), Some(stored));

    durable.set_down(true);
    let second = cache.fetch(&ctx, "videos", "v1", TTL).await.unwrap();
    assert_eq!(second.source(), Some(FetchSource::Ephemeral));
    assert_eq!(second.result().and_then(|r| r.data()), Some(&json!({"title": "X"})));
}

#[tokio::test]
async fn test_durable_outage_degrades_to_producer() {
    let durable = FlakyDurable::new().await;
    let cache = TieredCache::new(durable.clone(), Arc::new(MemoryStore::new()), TTL);
    let ctx = RequestContext::new();

    durable.set_down(true);
    assert!(cache.fetch(&ctx, "videos", "v1", TTL).await.is_err());

    let outcome = cache
        .fetch_with(&ctx, "videos", "v1", TTL, || async { Ok(TaggedResult::ok(json!("live"))) })
        .await
        .unwrap();
    assert_eq!(outcome.source(), Some(FetchSource::Producer));
    assert_eq!(outcome.result().and_then(|r| r.data()), Some(&json!("live")));
}

#[tokio::test]
async fn test_durable_write_failure_propagates() {
    let durable = FlakyDurable::new().await;
    let ephemeral = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(durable.clone(), ephemeral.clone(), TTL);

    durable.set_down(true);
    let result = cache.write(&RequestContext::new(), "videos", "v1", json!(1)).await;
    assert!(matches!(result, Err(e) if e.is_store_unavailable()));
    assert!(ephemeral.get("cache:videos:v1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_lock_timeout_scenario() {
    let lock = DistributedLock::new(Arc::new(MemoryStore::new()), "lock", Duration::from_secs(300));
    let ctx = RequestContext::new();
    let timeout = Some(Duration::from_secs(1));

    lock.acquire(&ctx, "u1", "search", timeout).await.unwrap();
    let second = lock.acquire(&ctx, "u1", "search", timeout).await;
    assert!(matches!(second, Err(Error::LockContention { .. })));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(lock.acquire(&ctx, "u1", "search", timeout).await.is_ok());
}

#[tokio::test]
async fn test_lock_timeout_scenario_sqlite() {
    let db = SqliteStore::open_in_memory().await.unwrap();
    let lock = DistributedLock::new(Arc::new(db.ephemeral()), "lock", Duration::from_secs(300));
    let ctx = RequestContext::new();
    let timeout = Some(Duration::from_secs(1));

    lock.acquire(&ctx, "u1", "search", timeout).await.unwrap();
    assert!(lock.acquire(&ctx, "u1", "search", timeout).await.is_err());

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(lock.acquire(&ctx, "u1", "search", timeout).await.is_ok());
}

#[tokio::test]
async fn test_locked_generation_reports_busy() {
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
    let lock = DistributedLock::new(ephemeral, "lock", Duration::from_secs(300));
    let ctx = RequestContext::new();

    let held = lock.acquire(&ctx, "v1", "summarize", None).await.unwrap();
    let tagged = lock
        .with_lock(&ctx, "v1", "summarize", None, || async { TaggedResult::ok(json!("summary")) })
        .await
        .unwrap()
        .into_tagged();
    assert_eq!(tagged, TaggedResult::failure("busy"));

    lock.release_owned("v1", "summarize", &held).await.unwrap();
    let ran = lock
        .with_lock(&ctx, "v1", "summarize", None, || async { TaggedResult::ok(json!("summary")) })
        .await
        .unwrap();
    assert!(matches!(ran, Locked::Ran(ref r) if r.success));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_schedules_run_producer_once() {
    let durable = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let ephemeral = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(durable, ephemeral.clone(), TTL);
    let dedup = JobDeduplicator::new(ephemeral, Duration::from_secs(120));
    let pool = WorkerPool::new(4).unwrap();
    let scheduler = AsyncScheduler::new(cache.clone(), dedup, Arc::new(pool.clone()), Duration::from_millis(50));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let producer: Arc<dyn Producer> = Arc::new(FnProducer::new("transcript", move |key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(TaggedResult::ok(json!({"transcript": format!("text of {key}")})))
        }
    }));

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let scheduler = scheduler.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                scheduler
                    .schedule_if_absent(&RequestContext::new(), "transcripts", "v1", producer)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut scheduled = 0;
    for task in tasks {
        if task.await.unwrap() == ScheduleOutcome::Scheduled {
            scheduled += 1;
        }
    }
    assert_eq!(scheduled, 1);

    pool.wait_idle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let outcome = cache.fetch(&RequestContext::new(), "transcripts", "v1", TTL).await.unwrap();
    assert_eq!(outcome.result().and_then(|r| r.data()), Some(&json!({"transcript": "text of v1"})));
}

#[tokio::test]
async fn test_stale_failure_self_heals() {
    let durable = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let cache = TieredCache::new(durable.clone(), Arc::new(MemoryStore::new()), TTL);
    let ctx = RequestContext::new();

    durable
        .put("videos", "v1", &json!({"success": false, "error": "quota exceeded"}))
        .await
        .unwrap();

    let outcome = cache
        .fetch_with(&ctx, "videos", "v1", TTL, || async { Ok(TaggedResult::ok(json!({"title": "Y"}))) })
        .await
        .unwrap();
    assert_eq!(outcome.source(), Some(FetchSource::Producer));
    assert_eq!(
        durable.get("videos", "v1").await.unwrap(),
        Some(json!({"success": true, "data": {"title": "Y"}}))
    );
}

#[tokio::test]
async fn test_failure_never_reaches_either_tier() {
    let durable = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let ephemeral = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(durable.clone(), ephemeral.clone(), TTL);
    let ctx = RequestContext::new();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let outcome = cache
            .fetch_with(&ctx, "videos", "v1", TTL, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TaggedResult::failure("upstream timeout"))
            })
            .await
            .unwrap();
        assert_eq!(outcome.result().map(|r| r.success), Some(false));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(durable.get("videos", "v1").await.unwrap().is_none());
    assert!(ephemeral.get("cache:videos:v1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_scheduled_results_become_searchable() {
    let durable = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let ephemeral = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(durable.clone(), ephemeral.clone(), TTL);
    let pool = WorkerPool::new(2).unwrap();
    let scheduler = AsyncScheduler::new(
        cache,
        JobDeduplicator::new(ephemeral, Duration::from_secs(120)),
        Arc::new(pool.clone()),
        Duration::ZERO,
    );
    let weights = FieldWeights::new([("tldr", 10.0), ("summary", 8.0), ("takeaways", 8.0)]).unwrap();
    let search = SearchIndex::new(durable, "summaries", weights).unwrap();
    let ctx = RequestContext::new();

    // Index first so later writes are indexed as they land.
    search.ensure_index().await.unwrap();

    let producer: Arc<dyn Producer> = Arc::new(FnProducer::new("summary", |key: String| async move {
        let doc = match key.as_str() {
            "a" => json!({"summary": "borrow checker basics"}),
            _ => json!({"tldr": "async rust", "takeaways": ["pin your futures", "async traits"]}),
        };
        Ok::<_, Error>(TaggedResult::ok(doc))
    }));

    for key in ["a", "b"] {
        scheduler.schedule_if_absent(&ctx, "summaries", key, producer.clone()).await.unwrap();
    }
    pool.wait_idle().await;

    let hits = search.search_text(&ctx, &TextQuery::new("async", 10)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!((hits[0].id.as_str(), hits[0].score), ("b", 18.0));

    let borrow = search.search_text(&ctx, &TextQuery::new("borrow", 10)).await.unwrap();
    assert_eq!(borrow.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
}

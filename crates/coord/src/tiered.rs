//! Two-tier cache: an ephemeral TTL mirror in front of a durable store.
//!
//! The durable store is authoritative. Only successful results are ever
//! persisted; a failure document found in the durable tier (left behind by an
//! older writer) is evicted on read so the next fetch regenerates it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use recall_core::store::keys;
use recall_core::{DurableStore, EphemeralStore, Error, RequestContext, Stores, TaggedResult};
use serde_json::Value;

use crate::producer::Producer;

/// Which tier (or the producer) supplied a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Ephemeral,
    Durable,
    Producer,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchSource::Ephemeral => "ephemeral",
            FetchSource::Durable => "durable",
            FetchSource::Producer => "producer",
        }
    }
}

/// Outcome of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A result is available. Failures only ever come from the producer.
    Ready { result: TaggedResult, source: FetchSource },
    /// Nothing cached and no producer supplied.
    Pending,
}

impl FetchOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchOutcome::Pending)
    }

    pub fn result(&self) -> Option<&TaggedResult> {
        match self {
            FetchOutcome::Ready { result, .. } => Some(result),
            FetchOutcome::Pending => None,
        }
    }

    pub fn source(&self) -> Option<FetchSource> {
        match self {
            FetchOutcome::Ready { source, .. } => Some(*source),
            FetchOutcome::Pending => None,
        }
    }

    pub fn into_result(self) -> Option<TaggedResult> {
        match self {
            FetchOutcome::Ready { result, .. } => Some(result),
            FetchOutcome::Pending => None,
        }
    }
}

/// Read-through, write-through cache over a durable and an ephemeral store.
#[derive(Clone)]
pub struct TieredCache {
    durable: Arc<dyn DurableStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    default_ttl: Duration,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache").field("default_ttl", &self.default_ttl).finish_non_exhaustive()
    }
}

impl TieredCache {
    /// `default_ttl` applies to ephemeral mirrors written by [`TieredCache::write`].
    pub fn new(durable: Arc<dyn DurableStore>, ephemeral: Arc<dyn EphemeralStore>, default_ttl: Duration) -> Self {
        Self { durable, ephemeral, default_ttl }
    }

    pub fn from_stores(stores: &Stores, default_ttl: Duration) -> Self {
        Self::new(stores.durable.clone(), stores.ephemeral.clone(), default_ttl)
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn ephemeral(&self) -> &Arc<dyn EphemeralStore> {
        &self.ephemeral
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look the key up in both tiers without producing anything.
    ///
    /// Returns [`FetchOutcome::Pending`] on a miss. Store errors propagate
    /// because there is no producer to fall back on.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<FetchOutcome, Error> {
        match self.lookup(ctx, namespace, key, ttl, false).await? {
            Some(hit) => Ok(hit),
            None => {
                tracing::debug!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, "cache miss; pending");
                Ok(FetchOutcome::Pending)
            }
        }
    }

    /// Look the key up and run `producer` on a miss.
    ///
    /// Successful results are persisted durably and mirrored; failures are
    /// returned to the caller and never stored. Store read errors count as a
    /// miss here since the producer can still answer.
    pub async fn fetch_with<F, Fut>(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<FetchOutcome, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TaggedResult, Error>>,
    {
        if let Some(hit) = self.lookup(ctx, namespace, key, ttl, true).await? {
            return Ok(hit);
        }

        let result = match producer().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "producer raised");
                TaggedResult::failure(e.to_string())
            }
        };

        if !result.is_cacheable() {
            tracing::warn!(
                request_id = %ctx.request_id(),
                namespace = %namespace,
                key = %key,
                error = %result.error_message(),
                "producer failed; result not cached"
            );
            return Ok(FetchOutcome::Ready { result, source: FetchSource::Producer });
        }

        // The caller still gets the value when persisting it fails.
        if let Err(e) = self.persist(ctx, namespace, key, &result, ttl).await {
            tracing::error!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "failed to persist produced result");
        }

        Ok(FetchOutcome::Ready { result, source: FetchSource::Producer })
    }

    /// [`TieredCache::fetch_with`] driven by a [`Producer`].
    pub async fn fetch_with_producer(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        ttl: Duration,
        producer: &dyn Producer,
    ) -> Result<FetchOutcome, Error> {
        self.fetch_with(ctx, namespace, key, ttl, || producer.produce(ctx, key)).await
    }

    /// Store `data` as a successful result: durable first, then the mirror.
    ///
    /// # Errors
    ///
    /// Fails when the durable write fails. A failed mirror write is logged.
    pub async fn write(&self, ctx: &RequestContext, namespace: &str, key: &str, data: Value) -> Result<(), Error> {
        keys::validate_namespace(namespace)?;
        let result = TaggedResult::ok(data);
        self.persist(ctx, namespace, key, &result, self.default_ttl).await
    }

    /// True when a successful result is cached in either tier.
    pub async fn contains(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        keys::validate_namespace(namespace)?;
        match self.ephemeral.get(&keys::cache_key(namespace, key)).await {
            Ok(Some(doc)) => {
                if TaggedResult::from_document(doc).is_cacheable() {
                    return Ok(true);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(namespace = %namespace, key = %key, error = %e, "ephemeral read failed"),
        }

        Ok(self
            .durable
            .get(namespace, key)
            .await?
            .is_some_and(|doc| TaggedResult::from_document(doc).is_cacheable()))
    }

    /// Drop the key from both tiers. Returns whether a durable document existed.
    pub async fn invalidate(&self, ctx: &RequestContext, namespace: &str, key: &str) -> Result<bool, Error> {
        keys::validate_namespace(namespace)?;
        let existed = self.durable.delete(namespace, key).await?;
        if let Err(e) = self.ephemeral.delete(&keys::cache_key(namespace, key)).await {
            tracing::warn!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "failed to drop ephemeral mirror");
        }
        tracing::info!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, existed, "invalidated");
        Ok(existed)
    }

    async fn persist(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        result: &TaggedResult,
        ttl: Duration,
    ) -> Result<(), Error> {
        let doc = result.to_document();
        self.durable.put(namespace, key, &doc).await?;
        tracing::debug!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, "stored durable result");
        self.mirror(namespace, key, &doc, ttl).await;
        Ok(())
    }

    async fn mirror(&self, namespace: &str, key: &str, doc: &Value, ttl: Duration) {
        if let Err(e) = self.ephemeral.set(&keys::cache_key(namespace, key), doc, ttl).await {
            tracing::warn!(namespace = %namespace, key = %key, error = %e, "failed to write ephemeral mirror");
        }
    }

    /// Tier walk shared by the fetch variants. `degrade` turns durable read
    /// errors into misses.
    async fn lookup(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        key: &str,
        ttl: Duration,
        degrade: bool,
    ) -> Result<Option<FetchOutcome>, Error> {
        keys::validate_namespace(namespace)?;
        match self.ephemeral.get(&keys::cache_key(namespace, key)).await {
            Ok(Some(doc)) => {
                let result = TaggedResult::from_document(doc);
                if result.is_cacheable() {
                    tracing::debug!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, "ephemeral hit");
                    return Ok(Some(FetchOutcome::Ready { result, source: FetchSource::Ephemeral }));
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "ephemeral read failed; trying durable tier");
            }
        }

        let doc = match self.durable.get(namespace, key).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(None),
            Err(e) if degrade && e.is_store_unavailable() => {
                tracing::warn!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "durable read failed; treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let result = TaggedResult::from_document(doc);
        if result.is_cacheable() {
            tracing::debug!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, "durable hit");
            self.mirror(namespace, key, &result.to_document(), ttl).await;
            return Ok(Some(FetchOutcome::Ready { result, source: FetchSource::Durable }));
        }

        tracing::warn!(
            request_id = %ctx.request_id(),
            namespace = %namespace,
            key = %key,
            error = %result.error_message(),
            "evicting stored failure"
        );
        if let Err(e) = self.durable.delete(namespace, key).await {
            tracing::warn!(request_id = %ctx.request_id(), namespace = %namespace, key = %key, error = %e, "failed to evict stored failure");
        }
        Ok(None)
    }
}

//! In-process ephemeral store (moka).
//!
//! Each entry carries its own TTL through a moka [`Expiry`] policy. Atomic
//! operations go through moka's entry API, which serializes concurrent
//! initializers of the same key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use serde_json::Value;

use crate::Error;
use crate::store::EphemeralStore;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Arc<Value>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, MemoryEntry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &MemoryEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self, _key: &String, value: &MemoryEntry, _updated_at: Instant, _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory TTL cache, optionally bounded in size.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, MemoryEntry>,
}

impl MemoryStore {
    const DEFAULT_CAPACITY: u64 = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a store holding at most `capacity` entries.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Creates a store that never evicts by size; entries leave only through
    /// delete or TTL expiry.
    ///
    /// A bounded cache may reject or evict a fresh entry while still
    /// reporting the insert, which breaks `set_if_absent` as a claim.
    pub fn unbounded() -> Self {
        Self { entries: Cache::builder().expire_after(PerEntryTtl).build() }
    }

    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.entry_count() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(self.entries.get(key).map(|e| e.value.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), Error> {
        self.entries
            .insert(key.to_string(), MemoryEntry { value: Arc::new(value.clone()), ttl });
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &Value, ttl: Duration) -> Result<bool, Error> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry { value: Arc::new(value.clone()), ttl });
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.invalidate(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &Value) -> Result<bool, Error> {
        let result = self
            .entries
            .entry(key.to_string())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().value.as_ref() == expected => Op::Remove,
                _ => Op::Nop,
            });
        Ok(matches!(result, CompResult::Removed(_)))
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let before = self.entries.entry_count();
        self.entries.run_pending_tasks();
        Ok(before.saturating_sub(self.entries.entry_count()))
    }
}

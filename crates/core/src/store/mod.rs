//! Durable and ephemeral stores behind one interface each.
//!
//! Durable backends:
//!
//! - [`SqliteStore`]: document database on SQLite (WAL mode, migrations,
//!   inverted text index kept in SQL)
//! - [`FileStore`]: one JSON document per file, content-addressed names
//!
//! Ephemeral backends:
//!
//! - [`MemoryStore`]: in-process moka cache with per-entry TTL
//! - [`SqliteEphemeralStore`]: TTL table shared by every process that opens
//!   the same database file

pub mod file;
pub mod keys;
pub mod memory;
pub mod sqlite;
pub mod text;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use crate::Error;
use crate::config::{AppConfig, DurableBackend, EphemeralBackend};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::{SqliteEphemeralStore, SqliteStore};
pub use text::{FieldWeights, SearchHit, TextQuery};

/// Authoritative document store addressed by `(namespace, key)`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, Error>;

    /// Insert or overwrite; last write wins.
    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), Error>;

    /// Returns whether a document was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error>;

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, Error>;

    /// Create the namespace's text index unless one with exactly these
    /// weights exists. Returns whether an index was (re)built.
    async fn ensure_text_index(&self, namespace: &str, weights: &FieldWeights) -> Result<bool, Error>;

    async fn text_search(&self, namespace: &str, query: &TextQuery) -> Result<Vec<SearchHit>, Error>;
}

/// Fast TTL cache for result mirrors, lock entries and job markers.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), Error>;

    /// Atomically store `value` unless a live entry exists. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &Value, ttl: Duration) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Atomically delete the entry only if it currently holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &Value) -> Result<bool, Error>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, Error>;
}

/// Stores selected by configuration.
#[derive(Clone)]
pub struct Stores {
    pub durable: Arc<dyn DurableStore>,
    /// Result mirrors; may drop entries under memory pressure.
    pub ephemeral: Arc<dyn EphemeralStore>,
    /// Lock entries and job markers. Entries leave only by delete or expiry.
    pub coordination: Arc<dyn EphemeralStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Open the durable and ephemeral backends named in `config`.
///
/// When both are SQLite they share one connection.
pub async fn open_stores(config: &AppConfig) -> Result<Stores, Error> {
    let needs_sqlite = config.durable_backend == DurableBackend::Sqlite
        || config.ephemeral_backend == EphemeralBackend::Sqlite;
    let sqlite = if needs_sqlite { Some(SqliteStore::open(&config.db_path).await?) } else { None };

    let durable: Arc<dyn DurableStore> = match (config.durable_backend, &sqlite) {
        (DurableBackend::Sqlite, Some(db)) => Arc::new(db.clone()),
        _ => Arc::new(FileStore::open(&config.file_root).await?),
    };

    // The capacity bound applies to mirrors only; an evicted lock or marker
    // would let a second holder in.
    let (ephemeral, coordination): (Arc<dyn EphemeralStore>, Arc<dyn EphemeralStore>) =
        match (config.ephemeral_backend, &sqlite) {
            (EphemeralBackend::Sqlite, Some(db)) => {
                let table: Arc<dyn EphemeralStore> = Arc::new(db.ephemeral());
                (table.clone(), table)
            }
            _ => (
                Arc::new(MemoryStore::with_capacity(config.ephemeral_capacity)),
                Arc::new(MemoryStore::unbounded()),
            ),
        };

    tracing::info!(
        durable = ?config.durable_backend,
        ephemeral = ?config.ephemeral_backend,
        "opened stores"
    );

    Ok(Stores { durable, ephemeral, coordination })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_stores_file_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            durable_backend: DurableBackend::File,
            ephemeral_backend: EphemeralBackend::Memory,
            file_root: dir.path().join("docs"),
            ..Default::default()
        };
        let stores = open_stores(&config).await.unwrap();

        stores.durable.put("videos", "v1", &json!({"success": true, "data": 1})).await.unwrap();
        assert!(stores.durable.exists("videos", "v1").await.unwrap());

        stores.ephemeral.set("k", &json!(1), Duration::from_secs(5)).await.unwrap();
        assert_eq!(stores.ephemeral.get("k").await.unwrap(), Some(json!(1)));
        assert!(stores.coordination.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_stores_shared_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            durable_backend: DurableBackend::Sqlite,
            ephemeral_backend: EphemeralBackend::Sqlite,
            db_path: dir.path().join("recall.sqlite"),
            ..Default::default()
        };
        let stores = open_stores(&config).await.unwrap();

        stores.durable.put("videos", "v1", &json!({"success": true, "data": 1})).await.unwrap();
        assert!(stores.ephemeral.set_if_absent("lock:a:b", &json!("t"), Duration::from_secs(5)).await.unwrap());
        assert!(!stores.ephemeral.set_if_absent("lock:a:b", &json!("t2"), Duration::from_secs(5)).await.unwrap());
        assert!(!stores.coordination.set_if_absent("lock:a:b", &json!("t3"), Duration::from_secs(5)).await.unwrap());
    }
}

//! Document CRUD operations.
//!
//! Documents are stored as JSON text. Writes keep the namespace's text index
//! postings in step inside the same transaction.

use async_trait::async_trait;
use serde_json::Value;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

use super::connection::SqliteStore;
use super::text_index;
use crate::Error;
use crate::store::text::{FieldWeights, SearchHit, TextQuery};
use crate::store::{DurableStore, keys};

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, Error> {
        keys::validate_namespace(namespace)?;
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Value>, Error> {
                let json: Option<String> = conn
                    .query_row(
                        "SELECT value_json FROM documents WHERE namespace = ?1 AND key = ?2",
                        params![namespace, key],
                        |row| row.get(0),
                    )
                    .optional()?;

                match json {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or update a document.
    ///
    /// Uses UPSERT semantics; the last write for a key wins.
    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), Error> {
        keys::validate_namespace(namespace)?;
        let namespace = namespace.to_string();
        let key = key.to_string();
        let value = value.clone();
        let json = serde_json::to_string(&value)?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO documents (namespace, key, value_json, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(namespace, key) DO UPDATE SET
                        value_json = excluded.value_json,
                        updated_at = excluded.updated_at",
                    params![namespace, key, json, updated_at],
                )?;

                if let Some(weights) = text_index::load_weights(&tx, &namespace)? {
                    text_index::index_document(&tx, &namespace, &key, &value, &weights)?;
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        keys::validate_namespace(namespace)?;
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let count = tx.execute(
                    "DELETE FROM documents WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                tx.execute(
                    "DELETE FROM text_terms WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                tx.commit()?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        keys::validate_namespace(namespace)?;
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM documents WHERE namespace = ?1 AND key = ?2)",
                    params![namespace, key],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    async fn ensure_text_index(&self, namespace: &str, weights: &FieldWeights) -> Result<bool, Error> {
        keys::validate_namespace(namespace)?;
        text_index::ensure(&self.conn, namespace, weights).await
    }

    async fn text_search(&self, namespace: &str, query: &TextQuery) -> Result<Vec<SearchHit>, Error> {
        keys::validate_namespace(namespace)?;
        text_index::search(&self.conn, namespace, query).await
    }
}

impl SqliteStore {
    /// Number of documents in a namespace.
    pub async fn count(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE namespace = ?1",
                    params![namespace],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

pub(crate) fn all_documents(conn: &rusqlite::Connection, namespace: &str) -> Result<Vec<(String, Value)>, Error> {
    let mut stmt = conn.prepare("SELECT key, value_json FROM documents WHERE namespace = ?1")?;
    let rows = stmt.query_map(params![namespace], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut docs = Vec::new();
    for row in rows {
        let (key, json) = row?;
        docs.push((key, serde_json::from_str(&json)?));
    }
    Ok(docs)
}

//! File-backed durable store.
//!
//! Layout: `<root>/<namespace>/<sha256(namespace, key)>.json`, each file
//! holding `{"key": .., "value": ..}`. Writes go to a temporary file that is
//! renamed over the target, so readers never see a torn document. The text
//! index is a weight manifest per namespace; searches scan the namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::Error;
use crate::store::text::{self, FieldWeights, SearchHit, TextQuery};
use crate::store::{DurableStore, keys};

const INDEX_MANIFEST: &str = "_text_index.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    key: String,
    value: Value,
}

/// Durable store keeping one JSON file per document.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, Error> {
        keys::validate_namespace(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn document_path(&self, namespace: &str, key: &str) -> Result<PathBuf, Error> {
        Ok(self
            .namespace_dir(namespace)?
            .join(format!("{}.json", keys::document_digest(namespace, key))))
    }

    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), Error> {
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_document(path: &Path) -> Result<Option<StoredDocument>, Error> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_weights(&self, namespace: &str) -> Result<Option<FieldWeights>, Error> {
        let path = self.namespace_dir(namespace)?.join(INDEX_MANIFEST);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn documents(&self, namespace: &str) -> Result<Vec<StoredDocument>, Error> {
        let dir = self.namespace_dir(namespace)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != INDEX_MANIFEST);
            if !is_document {
                continue;
            }
            // A concurrent delete between listing and reading is not an error.
            if let Some(doc) = Self::read_document(&path).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, Error> {
        let path = self.document_path(namespace, key)?;
        Ok(Self::read_document(&path).await?.map(|doc| doc.value))
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), Error> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;

        let doc = StoredDocument { key: key.to_string(), value: value.clone() };
        let path = self.document_path(namespace, key)?;
        Self::write_atomic(&path, serde_json::to_vec(&doc)?).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let path = self.document_path(namespace, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let path = self.document_path(namespace, key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn ensure_text_index(&self, namespace: &str, weights: &FieldWeights) -> Result<bool, Error> {
        let current = self
            .load_weights(namespace)
            .await
            .map_err(|e| Error::IndexCreationFailure(e.to_string()))?;
        if current.as_ref() == Some(weights) {
            return Ok(false);
        }

        let dir = self.namespace_dir(namespace)?;
        let write = async {
            fs::create_dir_all(&dir).await?;
            Self::write_atomic(&dir.join(INDEX_MANIFEST), serde_json::to_vec(weights)?).await
        };
        write.await.map_err(|e| Error::IndexCreationFailure(e.to_string()))?;

        tracing::info!(namespace = %namespace, fields = weights.len(), "wrote text index manifest");
        Ok(true)
    }

    async fn text_search(&self, namespace: &str, query: &TextQuery) -> Result<Vec<SearchHit>, Error> {
        let terms = query.terms();
        if terms.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let weights = self
            .load_weights(namespace)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("namespace {namespace} has no text index")))?;

        let hits = self
            .documents(namespace)
            .await?
            .into_iter()
            .filter(|doc| query.admits(&doc.key))
            .filter_map(|doc| {
                text::score_document(&doc.value, &weights, &terms).map(|parts| SearchHit {
                    id: doc.key,
                    score: parts.score,
                    matched_text: parts.matched_text,
                })
            })
            .collect();

        Ok(text::rank(hits, query.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = store().await;
        let doc = json!({"success": true, "data": {"title": "X"}});

        store.put("videos", "v1", &doc).await.unwrap();
        assert_eq!(store.get("videos", "v1").await.unwrap(), Some(doc));
        assert!(store.exists("videos", "v1").await.unwrap());

        assert!(store.delete("videos", "v1").await.unwrap());
        assert!(!store.exists("videos", "v1").await.unwrap());
        assert!(!store.delete("videos", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_namespace() {
        let (_dir, store) = store().await;
        assert!(store.get("nothing", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (_dir, store) = store().await;
        store.put("videos", "v1", &json!(1)).await.unwrap();
        store.put("videos", "v1", &json!(2)).await.unwrap();

        assert_eq!(store.get("videos", "v1").await.unwrap(), Some(json!(2)));
        let files = std::fs::read_dir(store.root().join("videos")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, store) = store().await;
        assert!(matches!(store.put("../escape", "k", &json!(1)).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_weighted_search() {
        let (_dir, store) = store().await;
        let weights = FieldWeights::new([("tldr", 10.0), ("summary", 8.0), ("takeaways", 8.0)]).unwrap();

        store
            .put("summaries", "a", &json!({"success": true, "data": {"summary": "learning rails"}}))
            .await
            .unwrap();
        store
            .put(
                "summaries",
                "b",
                &json!({"success": true, "data": {"tldr": "rails tips", "takeaways": ["ship rails"]}}),
            )
            .await
            .unwrap();

        assert!(store.ensure_text_index("summaries", &weights).await.unwrap());
        assert!(!store.ensure_text_index("summaries", &weights).await.unwrap());

        let hits = store.text_search("summaries", &TextQuery::new("Rails", 10)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!((hits[0].id.as_str(), hits[0].score), ("b", 18.0));
        assert_eq!((hits[1].id.as_str(), hits[1].score), ("a", 8.0));

        let filtered = TextQuery::new("rails", 10).with_filter(vec!["a".into()]);
        let hits = store.text_search("summaries", &filtered).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }
}

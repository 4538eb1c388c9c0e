//! Weighted full-text search over one durable namespace.

use std::sync::Arc;

use recall_core::store::keys;
use recall_core::{DurableStore, Error, FieldWeights, RequestContext, SearchHit, TextQuery};

/// Search handle bound to a namespace and its field weights.
///
/// Every search first makes sure the index exists with these weights, so the
/// first query against a fresh store builds it.
#[derive(Clone)]
pub struct SearchIndex {
    store: Arc<dyn DurableStore>,
    namespace: String,
    weights: FieldWeights,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("namespace", &self.namespace)
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

impl SearchIndex {
    pub fn new(store: Arc<dyn DurableStore>, namespace: impl Into<String>, weights: FieldWeights) -> Result<Self, Error> {
        let namespace = namespace.into();
        keys::validate_namespace(&namespace)?;
        Ok(Self { store, namespace, weights })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn weights(&self) -> &FieldWeights {
        &self.weights
    }

    /// Create the index, or rebuild it when the stored weights differ.
    ///
    /// Returns `true` when the index was (re)built.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexCreationFailure`] when the backend cannot build it.
    pub async fn ensure_index(&self) -> Result<bool, Error> {
        let created = self
            .store
            .ensure_text_index(&self.namespace, &self.weights)
            .await
            .map_err(|e| match e {
                Error::InvalidInput(_) | Error::IndexCreationFailure(_) => e,
                other => Error::IndexCreationFailure(other.to_string()),
            })?;
        if created {
            tracing::info!(namespace = %self.namespace, fields = self.weights.len(), "text index built");
        }
        Ok(created)
    }

    /// Run `query`, best match first. Equal scores are ordered by key.
    pub async fn search_text(&self, ctx: &RequestContext, query: &TextQuery) -> Result<Vec<SearchHit>, Error> {
        self.ensure_index().await?;

        let hits = self.store.text_search(&self.namespace, query).await?;
        tracing::debug!(
            request_id = %ctx.request_id(),
            namespace = %self.namespace,
            query = %query.query,
            hits = hits.len(),
            "text search"
        );
        Ok(hits)
    }
}

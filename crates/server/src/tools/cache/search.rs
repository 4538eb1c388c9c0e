//! cache_search tool implementation.
//!
//! Weighted full-text search over cached documents.

use recall_coord::SearchIndex;
use recall_core::{Error, RequestContext, SearchHit, TextQuery};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::tools::json_result;

const MAX_LIMIT: usize = 100;

/// Parameters for the cache_search tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSearchParams {
    /// Namespace to search; defaults to the configured search namespace.
    /// Only configured namespaces are searchable.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Free-text query.
    pub query: String,

    /// Restrict results to these keys.
    #[serde(default)]
    pub ids: Option<Vec<String>>,

    /// Maximum number of hits (capped at 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Output from the cache_search tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSearchOutput {
    pub namespace: String,
    pub hits: Vec<SearchHit>,
}

/// Implementation of the cache_search tool.
pub async fn search_impl(
    state: &AppState, ctx: &RequestContext, params: CacheSearchParams,
) -> Result<CallToolResult, McpError> {
    if params.query.trim().is_empty() {
        return Err(Error::InvalidInput("query cannot be empty".into()).into());
    }

    let default_index = &state.coord.search;
    let index = match params.namespace {
        Some(ref namespace) if namespace != default_index.namespace() => {
            // Searching builds the index on first use, so only listed namespaces get one.
            if !state.config.is_searchable(namespace) {
                return Err(Error::InvalidInput(format!("namespace {namespace:?} is not searchable")).into());
            }
            SearchIndex::new(state.coord.cache.durable().clone(), namespace.clone(), default_index.weights().clone())?
        }
        _ => default_index.clone(),
    };

    let limit = params.limit.unwrap_or(state.config.search_limit).min(MAX_LIMIT);
    let mut query = TextQuery::new(params.query, limit);
    if let Some(ids) = params.ids {
        query = query.with_filter(ids);
    }

    let hits = index.search_text(ctx, &query).await?;
    json_result(&CacheSearchOutput { namespace: index.namespace().to_string(), hits })
}

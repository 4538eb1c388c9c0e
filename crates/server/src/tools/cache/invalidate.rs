//! cache_invalidate tool implementation.
//!
//! Drops an entry from both cache tiers.

use recall_core::RequestContext;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    pub namespace: String,
    pub key: String,
}

/// Output from the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateOutput {
    /// Whether a durable entry existed.
    pub invalidated: bool,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(
    state: &AppState, ctx: &RequestContext, params: CacheInvalidateParams,
) -> Result<CallToolResult, McpError> {
    let invalidated = state.coord.cache.invalidate(ctx, &params.namespace, &params.key).await?;
    json_result(&CacheInvalidateOutput { invalidated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use crate::tools::output_json;
    use serde_json::json;

    #[tokio::test]
    async fn test_invalidate_existing_and_missing() {
        let state = test_state().await;
        let ctx = RequestContext::new();
        state.coord.cache.write(&ctx, "videos", "v1", json!(1)).await.unwrap();

        let params = CacheInvalidateParams { namespace: "videos".into(), key: "v1".into() };
        let output: CacheInvalidateOutput = output_json(&invalidate_impl(&state, &ctx, params.clone()).await.unwrap());
        assert!(output.invalidated);
        assert!(!state.coord.cache.contains("videos", "v1").await.unwrap());

        let output: CacheInvalidateOutput = output_json(&invalidate_impl(&state, &ctx, params).await.unwrap());
        assert!(!output.invalidated);
    }

    #[tokio::test]
    async fn test_invalidate_rejects_bad_namespace() {
        let state = test_state().await;
        let params = CacheInvalidateParams { namespace: "../etc".into(), key: "v1".into() };
        assert!(invalidate_impl(&state, &RequestContext::new(), params).await.is_err());
    }
}

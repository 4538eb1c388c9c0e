//! cache_purge tool implementation.
//!
//! Removes expired ephemeral entries (cache mirrors, job markers and locks).

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of expired entries removed.
    pub purged: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(state: &AppState, _params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let purged = state.coord.purge_expired().await?;
    tracing::info!(purged, "purged expired ephemeral entries");
    json_result(&CachePurgeOutput { purged })
}

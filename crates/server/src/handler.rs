//! MCP handler exposing the cache tools.
//!
//! Each call gets its own request context; tool bodies live in `tools::cache`.
use std::sync::Arc;

use crate::state::AppState;
use crate::tools::cache::{
    CacheGetParams, CacheInvalidateParams, CachePurgeParams, CacheSearchParams, get_impl, invalidate_impl, purge_impl,
    search_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use tracing::Instrument;

/// The main MCP server handler for recall.
#[derive(Clone)]
pub struct RecallServer {
    tool_router: ToolRouter<Self>,
    state: Arc<AppState>,
}

/// A fresh per-call context; every tool call is its own request.
fn call_context() -> recall_core::RequestContext {
    recall_core::RequestContext::new().with_actor("mcp")
}

#[tool_router]
impl RecallServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { tool_router: Self::tool_router(), state }
    }

    /// Read a cached result.
    ///
    /// Returns the value with the tier that served it, or a pending status.
    /// Naming a configured producer schedules it on a miss.
    #[tool(
        description = "Read a cached result by namespace and key. Returns {status:\"ready\", data} or {status:\"pending\"}; pass `producer` to schedule generation on a miss."
    )]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        let ctx = call_context();
        get_impl(&self.state, &ctx, params.0).instrument(ctx.span()).await
    }

    #[tool(description = "Remove a cached result from both the durable and ephemeral tiers.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        let ctx = call_context();
        invalidate_impl(&self.state, &ctx, params.0).instrument(ctx.span()).await
    }

    /// Weighted full-text search over cached documents.
    #[tool(
        description = "Full-text search over cached documents, ranked by weighted term frequency. Optionally restrict to a configured namespace, a set of keys, and a result limit. The first search of a namespace builds its index."
    )]
    async fn cache_search(&self, params: Parameters<CacheSearchParams>) -> Result<CallToolResult, McpError> {
        let ctx = call_context();
        search_impl(&self.state, &ctx, params.0).instrument(ctx.span()).await
    }

    #[tool(description = "Remove expired ephemeral entries (cache mirrors, job markers, locks). Returns the number removed.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.state, params.0).await
    }
}

impl ServerHandler for RecallServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "recall".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    #[tokio::test]
    async fn test_lists_cache_tools() {
        let server = RecallServer::new(Arc::new(test_state().await));
        let mut names: Vec<_> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_get", "cache_invalidate", "cache_purge", "cache_search"]);
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = RecallServer::new(Arc::new(test_state().await));
        assert_eq!(server.get_info().server_info.name, "recall");
    }
}

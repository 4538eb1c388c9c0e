//! cache_get tool implementation.
//!
//! Reads a cached result, optionally scheduling its producer on a miss.

use recall_coord::FetchOutcome;
use recall_core::RequestContext;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Namespace of the entry (e.g. `summaries`).
    pub namespace: String,

    /// Key within the namespace.
    pub key: String,

    /// Producer to schedule when the entry is missing.
    #[serde(default)]
    pub producer: Option<String>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheGetOutput {
    /// The entry is cached.
    Ready {
        /// Tier that served it: `ephemeral` or `durable`.
        source: String,
        data: Value,
    },
    /// Not cached yet.
    Pending {
        /// What scheduling did, when a producer was named.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schedule: Option<String>,
    },
}

/// Implementation of the cache_get tool.
pub async fn get_impl(
    state: &AppState, ctx: &RequestContext, params: CacheGetParams,
) -> Result<CallToolResult, McpError> {
    let producer = params.producer.as_deref().map(|name| state.producer(name)).transpose()?;

    let outcome = state
        .coord
        .cache
        .fetch(ctx, &params.namespace, &params.key, state.config.ephemeral_ttl())
        .await?;

    let output = match outcome {
        FetchOutcome::Ready { result, source } => CacheGetOutput::Ready {
            source: source.as_str().to_string(),
            data: result.into_data().unwrap_or(Value::Null),
        },
        FetchOutcome::Pending => {
            let schedule = match producer {
                Some(producer) => Some(
                    state
                        .coord
                        .scheduler
                        .schedule_if_absent(ctx, &params.namespace, &params.key, producer)
                        .await?
                        .as_str()
                        .to_string(),
                ),
                None => None,
            };
            CacheGetOutput::Pending { schedule }
        }
    };

    json_result(&output)
}

//! Per-request context carried explicitly through every call.

use uuid::Uuid;

/// Identifies the request a unit of work belongs to, for log correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
    actor: Option<String>,
}

impl RequestContext {
    /// A context with a fresh random request id.
    pub fn new() -> Self {
        Self { request_id: Uuid::new_v4().to_string(), actor: None }
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), actor: None }
    }

    /// Attach the user or service on whose behalf the request runs.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or("-")
    }

    /// Span tagging every record emitted inside it with this request.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("request", request_id = %self.request_id, actor = %self.actor())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

//! Tagged producer results.
//!
//! Producers report `{success, data?, error?}`. Only a success carrying a
//! payload is ever written to a store; everything else is handed back to
//! the caller and forgotten.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Outcome of a producer run, in its stored wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TaggedResult {
    pub success: bool,
    /// A present `null` is still a payload.
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TaggedResult {
    /// A successful result carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    /// A failed result carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }

    /// Whether this result may be persisted.
    ///
    /// A success without a payload is non-conforming and treated like a failure.
    pub fn is_cacheable(&self) -> bool {
        self.success && self.data.is_some()
    }

    /// Interpret a stored document.
    ///
    /// Documents that do not parse as a tagged result come back as a failure so
    /// the read path evicts them.
    pub fn from_document(doc: Value) -> Self {
        serde_json::from_value(doc).unwrap_or_else(|e| Self::failure(format!("non-conforming document: {e}")))
    }

    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<Value> {
        self.data
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("producer returned no data")
    }
}

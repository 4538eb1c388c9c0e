//! Key composition for stores, locks and job markers.

use sha2::{Digest, Sha256};

use crate::Error;

/// Ephemeral key mirroring a durable `(namespace, key)` entry.
pub fn cache_key(namespace: &str, key: &str) -> String {
    format!("cache:{namespace}:{key}")
}

/// Logical job key `{producer_identity}:{key}`.
pub fn job_key(producer_identity: &str, key: &str) -> String {
    format!("{producer_identity}:{key}")
}

/// Ephemeral key holding the marker for a job key.
pub fn job_marker_key(job_key: &str) -> String {
    format!("job:{job_key}")
}

/// Lock key `{category}:{subject}:{action}`.
pub fn lock_key(category: &str, subject: &str, action: &str) -> String {
    format!("{category}:{subject}:{action}")
}

/// Content-addressed file name for a durable document.
pub fn document_digest(namespace: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Namespaces double as directory names in the file backend.
pub fn validate_namespace(namespace: &str) -> Result<(), Error> {
    if namespace.is_empty() {
        return Err(Error::InvalidInput("namespace cannot be empty".into()));
    }
    if !namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::InvalidInput(format!(
            "namespace {namespace:?} may only contain ASCII letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

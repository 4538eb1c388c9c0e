//! At-most-one-in-flight job scheduling.
//!
//! A job key is claimed by atomically creating `job:{job_key}` in the
//! ephemeral store, holding a per-claim id. The claim is released when the
//! job finishes, and only while the marker still holds that id; its TTL only
//! matters when the process dies mid-job.

use std::sync::Arc;
use std::time::Duration;

use recall_core::store::keys;
use recall_core::{EphemeralStore, Error};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobDeduplicator {
    store: Arc<dyn EphemeralStore>,
    marker_ttl: Duration,
}

impl std::fmt::Debug for JobDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDeduplicator").field("marker_ttl", &self.marker_ttl).finish_non_exhaustive()
    }
}

impl JobDeduplicator {
    pub fn new(store: Arc<dyn EphemeralStore>, marker_ttl: Duration) -> Self {
        Self { store, marker_ttl }
    }

    /// Claim `job_key` and hand the claim to `enqueue`.
    ///
    /// Returns `false` without calling `enqueue` when the job is already
    /// scheduled or running. The job should hold the [`MarkerGuard`] until
    /// it finishes. If `enqueue` fails the claim is released.
    pub async fn try_schedule<F>(&self, job_key: &str, enqueue: F) -> Result<bool, Error>
    where
        F: FnOnce(MarkerGuard) -> Result<(), Error>,
    {
        let marker = keys::job_marker_key(job_key);
        let claim = Value::String(Uuid::new_v4().to_string());
        if !self.store.set_if_absent(&marker, &claim, self.marker_ttl).await? {
            tracing::debug!(job_key = %job_key, "job already scheduled");
            return Ok(false);
        }

        let guard = MarkerGuard { dedup: self.clone(), job_key: Some(job_key.to_string()), claim: claim.clone() };
        if let Err(e) = enqueue(guard) {
            tracing::warn!(job_key = %job_key, error = %e, "enqueue failed; releasing marker");
            if let Err(cleanup) = self.release(job_key, &claim).await {
                tracing::warn!(job_key = %job_key, error = %cleanup, "marker release failed; it will expire");
            }
            return Err(e);
        }

        tracing::debug!(job_key = %job_key, ttl_secs = self.marker_ttl.as_secs(), "job scheduled");
        Ok(true)
    }

    /// Remove the marker for `job_key` whoever holds it. Missing markers are
    /// not an error.
    pub async fn complete(&self, job_key: &str) -> Result<(), Error> {
        self.store.delete(&keys::job_marker_key(job_key)).await
    }

    pub async fn is_scheduled(&self, job_key: &str) -> Result<bool, Error> {
        Ok(self.store.get(&keys::job_marker_key(job_key)).await?.is_some())
    }

    async fn release(&self, job_key: &str, claim: &Value) -> Result<bool, Error> {
        self.store.delete_if_eq(&keys::job_marker_key(job_key), claim).await
    }
}

/// A claimed job marker, released on [`MarkerGuard::complete`] or drop,
/// including on panic or cancellation of the job that owns it.
#[derive(Debug)]
pub struct MarkerGuard {
    dedup: JobDeduplicator,
    job_key: Option<String>,
    claim: Value,
}

impl MarkerGuard {
    pub fn job_key(&self) -> &str {
        self.job_key.as_deref().unwrap_or_default()
    }

    /// Release the claim now and disarm the guard. A marker that expired and
    /// was claimed again is left alone.
    pub async fn complete(mut self) -> Result<(), Error> {
        match self.job_key.take() {
            Some(job_key) => self.dedup.release(&job_key, &self.claim).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        let Some(job_key) = self.job_key.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dedup = self.dedup.clone();
                let claim = std::mem::take(&mut self.claim);
                handle.spawn(async move {
                    if let Err(e) = dedup.release(&job_key, &claim).await {
                        tracing::warn!(job_key = %job_key, error = %e, "marker release failed; it will expire");
                    }
                });
            }
            Err(_) => tracing::warn!(job_key = %job_key, "no runtime to release marker; it will expire"),
        }
    }
}

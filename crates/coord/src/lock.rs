//! Best-effort mutual exclusion over the ephemeral store.
//!
//! A lock is the entry `{category}:{subject}:{action}` holding a random owner
//! token. It is created with set-if-absent and a TTL, so a crashed holder
//! blocks others for at most the TTL. Release only deletes the entry while it
//! still holds the releaser's token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use recall_core::store::keys;
use recall_core::{EphemeralStore, Error, RequestContext, TaggedResult};
use serde_json::Value;
use uuid::Uuid;

/// Error text of the tagged failure returned when a lock is held elsewhere.
pub const BUSY: &str = "busy";

/// Owner token of an acquired lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of [`DistributedLock::with_lock`].
#[derive(Debug, Clone, PartialEq)]
pub enum Locked<T> {
    /// The block ran under the lock and produced this value.
    Ran(T),
    /// Another owner held the lock; the block did not run.
    Busy,
}

impl<T> Locked<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Locked::Busy)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Locked::Ran(value) => Some(value),
            Locked::Busy => None,
        }
    }
}

impl Locked<TaggedResult> {
    /// Collapse into a tagged result; contention becomes `{success: false, error: "busy"}`.
    pub fn into_tagged(self) -> TaggedResult {
        match self {
            Locked::Ran(result) => result,
            Locked::Busy => TaggedResult::failure(BUSY),
        }
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn EphemeralStore>,
    category: String,
    default_ttl: Duration,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("category", &self.category)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    pub fn new(store: Arc<dyn EphemeralStore>, category: impl Into<String>, default_ttl: Duration) -> Self {
        Self { store, category: category.into(), default_ttl }
    }

    pub fn key(&self, subject: &str, action: &str) -> String {
        keys::lock_key(&self.category, subject, action)
    }

    async fn try_acquire(&self, key: &str, timeout: Option<Duration>) -> Result<Option<LockToken>, Error> {
        let ttl = timeout.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(Error::InvalidInput("lock timeout must be greater than 0".into()));
        }

        let token = LockToken::generate();
        if self.store.set_if_absent(key, &token.to_value(), ttl).await? {
            tracing::debug!(lock = %key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Run `block` while holding the lock for `(subject, action)`.
    ///
    /// Returns [`Locked::Busy`] without running `block` when the lock is
    /// held. The lock is released after `block` finishes, and also when the
    /// returned future is dropped or `block` panics.
    pub async fn with_lock<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        subject: &str,
        action: &str,
        timeout: Option<Duration>,
        block: F,
    ) -> Result<Locked<T>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = self.key(subject, action);
        let Some(token) = self.try_acquire(&key, timeout).await? else {
            tracing::info!(request_id = %ctx.request_id(), lock = %key, "lock busy");
            return Ok(Locked::Busy);
        };

        let guard = LockGuard { lock: self.clone(), key: Some(key), token };
        let value = block().await;
        guard.release().await;

        Ok(Locked::Ran(value))
    }

    /// Acquire the lock and hand back the owner token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockContention`] when another owner holds it.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        subject: &str,
        action: &str,
        timeout: Option<Duration>,
    ) -> Result<LockToken, Error> {
        let key = self.key(subject, action);
        match self.try_acquire(&key, timeout).await? {
            Some(token) => Ok(token),
            None => {
                tracing::info!(request_id = %ctx.request_id(), lock = %key, "lock contention");
                Err(Error::LockContention { key })
            }
        }
    }

    /// Delete the lock unconditionally.
    pub async fn release(&self, ctx: &RequestContext, subject: &str, action: &str) -> Result<(), Error> {
        let key = self.key(subject, action);
        self.store.delete(&key).await?;
        tracing::debug!(request_id = %ctx.request_id(), lock = %key, "lock released");
        Ok(())
    }

    /// Delete the lock only while `token` still owns it.
    pub async fn release_owned(&self, subject: &str, action: &str, token: &LockToken) -> Result<bool, Error> {
        self.release_key(&self.key(subject, action), token).await
    }

    pub async fn is_locked(&self, subject: &str, action: &str) -> Result<bool, Error> {
        Ok(self.store.get(&self.key(subject, action)).await?.is_some())
    }

    async fn release_key(&self, key: &str, token: &LockToken) -> Result<bool, Error> {
        let released = self.store.delete_if_eq(key, &token.to_value()).await?;
        if !released {
            tracing::warn!(lock = %key, "lock expired or changed owner before release");
        }
        Ok(released)
    }
}

/// Releases a held lock on drop unless released explicitly.
struct LockGuard {
    lock: DistributedLock,
    key: Option<String>,
    token: LockToken,
}

impl LockGuard {
    async fn release(mut self) {
        if let Some(key) = self.key.take()
            && let Err(e) = self.lock.release_key(&key, &self.token).await
        {
            tracing::warn!(lock = %key, error = %e, "lock release failed; it will expire");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = %key, "no runtime to release lock; it will expire");
            return;
        };
        let lock = self.lock.clone();
        let token = self.token.clone();
        handle.spawn(async move {
            if let Err(e) = lock.release_key(&key, &token).await {
                tracing::warn!(lock = %key, error = %e, "lock release failed; it will expire");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryStore::new()), "lock", Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let lock = lock();
        let ctx = RequestContext::new();

        let outcome = lock.with_lock(&ctx, "v1", "summarize", None, || async { 42 }).await.unwrap();
        assert_eq!(outcome, Locked::Ran(42));
        assert!(!lock.is_locked("v1", "summarize").await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_busy_skips_block() {
        let lock = lock();
        let ctx = RequestContext::new();
        let _token = lock.acquire(&ctx, "v1", "summarize", None).await.unwrap();

        let ran = AtomicBool::new(false);
        let outcome = lock
            .with_lock(&ctx, "v1", "summarize", None, || async { ran.store(true, Ordering::SeqCst) })
            .await
            .unwrap();
        assert!(outcome.is_busy());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_busy_as_tagged_failure() {
        let tagged = Locked::<TaggedResult>::Busy.into_tagged();
        assert_eq!(tagged.to_document(), json!({"success": false, "error": "busy"}));

        let ran = Locked::Ran(TaggedResult::ok(json!(1))).into_tagged();
        assert!(ran.success);
    }

    #[tokio::test]
    async fn test_acquire_contention() {
        let lock = lock();
        let ctx = RequestContext::new();

        lock.acquire(&ctx, "v1", "summarize", None).await.unwrap();
        let second = lock.acquire(&ctx, "v1", "summarize", None).await;
        assert!(matches!(&second, Err(Error::LockContention { key }) if key == "lock:v1:summarize"));
        assert!(second.unwrap_err().is_contention());

        // Other actions on the same subject are independent.
        lock.acquire(&ctx, "v1", "transcribe", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_expires_after_timeout() {
        let lock = lock();
        let ctx = RequestContext::new();
        let timeout = Some(Duration::from_secs(1));

        lock.acquire(&ctx, "v1", "summarize", timeout).await.unwrap();
        assert!(lock.acquire(&ctx, "v1", "summarize", timeout).await.is_err());

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(lock.acquire(&ctx, "v1", "summarize", timeout).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_owned_respects_token() {
        let lock = lock();
        let ctx = RequestContext::new();
        let timeout = Some(Duration::from_millis(100));

        let stale = lock.acquire(&ctx, "v1", "summarize", timeout).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let current = lock.acquire(&ctx, "v1", "summarize", None).await.unwrap();

        assert!(!lock.release_owned("v1", "summarize", &stale).await.unwrap());
        assert!(lock.is_locked("v1", "summarize").await.unwrap());

        assert!(lock.release_owned("v1", "summarize", &current).await.unwrap());
        assert!(!lock.is_locked("v1", "summarize").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_unconditional() {
        let lock = lock();
        let ctx = RequestContext::new();
        lock.acquire(&ctx, "v1", "summarize", None).await.unwrap();
        lock.release(&ctx, "v1", "summarize").await.unwrap();
        assert!(lock.acquire(&ctx, "v1", "summarize", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let lock = lock();
        let result = lock.acquire(&RequestContext::new(), "v1", "summarize", Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancelled_block_releases_lock() {
        let lock = lock();
        let ctx = RequestContext::new();

        let pending = lock.with_lock(&ctx, "v1", "summarize", None, || std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_locked("v1", "summarize").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_single_winner() {
        let lock = lock();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                tokio::spawn(async move { lock.acquire(&RequestContext::new(), "v1", "summarize", None).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

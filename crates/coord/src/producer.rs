//! Producers: the external computations whose results get cached.
//!
//! The cache never looks inside a producer. It only needs a stable identity
//! (used to build job keys) and a way to run it for a key.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use recall_core::{Error, RequestContext, TaggedResult};
use tokio::process::Command;

/// An expensive computation producing a tagged result for a key.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Stable name, unique per kind of output (e.g. `transcript`, `summary`).
    fn identity(&self) -> &str;

    async fn produce(&self, ctx: &RequestContext, key: &str) -> Result<TaggedResult, Error>;
}

/// Adapts an async closure `Fn(key) -> Result<TaggedResult, Error>` into a [`Producer`].
pub struct FnProducer<F> {
    identity: String,
    f: F,
}

impl<F> FnProducer<F> {
    pub fn new(identity: impl Into<String>, f: F) -> Self {
        Self { identity: identity.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaggedResult, Error>> + Send,
{
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn produce(&self, _ctx: &RequestContext, key: &str) -> Result<TaggedResult, Error> {
        (self.f)(key.to_string()).await
    }
}

/// Runs an external program with the key as its last argument and reads a
/// tagged result as JSON from stdout.
///
/// The child is killed when the timeout elapses or when the produce future is
/// dropped, so a cancelled or stuck job never leaves a process behind.
#[derive(Debug, Clone)]
pub struct CommandProducer {
    identity: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProducer {
    pub fn new<I, S>(identity: impl Into<String>, program: impl Into<PathBuf>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity: identity.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

#[async_trait]
impl Producer for CommandProducer {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn produce(&self, ctx: &RequestContext, key: &str) -> Result<TaggedResult, Error> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(key)
            .env("RECALL_REQUEST_ID", ctx.request_id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::GenerationFailure(format!("{}: failed to spawn {:?}: {e}", self.identity, self.program)))?;

        // On timeout the output future is dropped with the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!(producer = %self.identity, key = %key, timeout_ms = self.timeout.as_millis() as u64, "producer timed out");
                Error::GenerationFailure(format!("{} timed out after {}ms", self.identity, self.timeout.as_millis()))
            })?
            .map_err(|e| Error::GenerationFailure(format!("{}: {e}", self.identity)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("{} exited with {}", self.identity, output.status),
                s => format!("{} exited with {}: {s}", self.identity, output.status),
            };
            return Ok(TaggedResult::failure(message));
        }

        match serde_json::from_slice::<TaggedResult>(&output.stdout) {
            Ok(result) => Ok(result),
            Err(e) => Ok(TaggedResult::failure(format!("{} produced non-conforming output: {e}", self.identity))),
        }
    }
}

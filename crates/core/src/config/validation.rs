//! Range and shape checks applied to a loaded `AppConfig`.

use crate::config::AppConfig;
use thiserror::Error;

/// Why a configuration could not be loaded or was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - any TTL is 0 or a lock/marker TTL exceeds one day
    /// - `worker_count` is 0 or above 256
    /// - `schedule_delay_ms` exceeds one minute
    /// - `lock_category` or `search_namespace` is empty or contains ':'
    /// - `search_weights` is empty or holds a non-positive weight
    /// - an extra search namespace is not a valid namespace
    /// - a producer identity contains ':' or has an empty program
    pub fn validate(&self) -> Result<(), ConfigError> {
        const DAY_SECS: u64 = 86_400;

        if self.ephemeral_ttl_secs == 0 {
            return Err(invalid("ephemeral_ttl_secs", "must be greater than 0"));
        }
        if self.job_marker_ttl_secs == 0 || self.job_marker_ttl_secs > DAY_SECS {
            return Err(invalid("job_marker_ttl_secs", "must be between 1 second and 1 day"));
        }
        if self.lock_ttl_secs == 0 || self.lock_ttl_secs > DAY_SECS {
            return Err(invalid("lock_ttl_secs", "must be between 1 second and 1 day"));
        }
        if self.ephemeral_capacity == 0 {
            return Err(invalid("ephemeral_capacity", "must be greater than 0"));
        }

        if self.worker_count == 0 || self.worker_count > 256 {
            return Err(invalid("worker_count", "must be between 1 and 256"));
        }
        if self.schedule_delay_ms > 60_000 {
            return Err(invalid("schedule_delay_ms", "must not exceed 1 minute (60000ms)"));
        }
        if self.producer_timeout_ms < 100 {
            return Err(invalid("producer_timeout_ms", "must be at least 100ms"));
        }

        if self.lock_category.is_empty() || self.lock_category.contains(':') {
            return Err(invalid("lock_category", "must be non-empty and must not contain ':'"));
        }
        if self.search_namespace.is_empty() || self.search_namespace.contains(':') {
            return Err(invalid("search_namespace", "must be non-empty and must not contain ':'"));
        }
        if self.search_limit == 0 {
            return Err(invalid("search_limit", "must be greater than 0"));
        }
        for namespace in &self.extra_search_namespaces {
            if let Err(e) = crate::store::keys::validate_namespace(namespace) {
                return Err(invalid("extra_search_namespaces", &e.to_string()));
            }
        }
        self.field_weights()?;

        for (identity, command) in &self.producers {
            if identity.is_empty() || identity.contains(':') {
                return Err(invalid("producers", "identity must be non-empty and must not contain ':'"));
            }
            if command.program.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("producers.{identity}.program"),
                    reason: "must not be empty".into(),
                });
            }
        }

        if self.job_marker_ttl_secs.saturating_mul(1_000) < self.producer_timeout_ms {
            tracing::warn!(
                job_marker_ttl_secs = self.job_marker_ttl_secs,
                producer_timeout_ms = self.producer_timeout_ms,
                "job markers can expire before a producer times out; \
                 a slow job may be scheduled twice"
            );
        }

        Ok(())
    }
}

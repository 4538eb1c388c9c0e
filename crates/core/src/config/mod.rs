//! Backend selection, TTLs, scheduling and search settings.
//!
//! Values come from figment layers; later layers override earlier ones:
//! built-in defaults, then the TOML file named by `RECALL_CONFIG_FILE`, then
//! `RECALL_*` environment variables (`__` separates nested keys, as in
//! `RECALL_SEARCH_WEIGHTS__TLDR=12`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::store::FieldWeights;

mod validation;

pub use validation::ConfigError;

/// Which durable backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    Sqlite,
    File,
}

/// Which ephemeral backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EphemeralBackend {
    /// Per-process moka cache. Locks and job markers are only visible inside
    /// one process.
    Memory,
    /// Table in the SQLite database; shared by every process using `db_path`.
    Sqlite,
}

/// External program registered as a producer.
///
/// It is run with the key as its last argument and must print a tagged
/// result as JSON on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Everything the stores and coordinators need, in one validated struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable backend: `sqlite` or `file`.
    ///
    /// Set via RECALL_DURABLE_BACKEND environment variable.
    #[serde(default = "default_durable_backend")]
    pub durable_backend: DurableBackend,

    /// Path to the SQLite database.
    ///
    /// Set via RECALL_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory of the file backend.
    ///
    /// Set via RECALL_FILE_ROOT environment variable.
    #[serde(default = "default_file_root")]
    pub file_root: PathBuf,

    /// Ephemeral backend: `memory` or `sqlite`.
    ///
    /// Set via RECALL_EPHEMERAL_BACKEND environment variable.
    #[serde(default = "default_ephemeral_backend")]
    pub ephemeral_backend: EphemeralBackend,

    /// Maximum entries held by the memory backend.
    #[serde(default = "default_ephemeral_capacity")]
    pub ephemeral_capacity: u64,

    /// TTL of ephemeral cache mirrors, in seconds.
    #[serde(default = "default_ephemeral_ttl_secs")]
    pub ephemeral_ttl_secs: u64,

    /// Safety-net TTL of job markers, in seconds.
    #[serde(default = "default_job_marker_ttl_secs")]
    pub job_marker_ttl_secs: u64,

    /// Default lock TTL, in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Prefix of lock keys (`{category}:{subject}:{action}`).
    #[serde(default = "default_lock_category")]
    pub lock_category: String,

    /// Wait before a scheduled job starts, in milliseconds.
    #[serde(default = "default_schedule_delay_ms")]
    pub schedule_delay_ms: u64,

    /// Background jobs allowed to run at once.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Timeout for external producer processes, in milliseconds.
    #[serde(default = "default_producer_timeout_ms")]
    pub producer_timeout_ms: u64,

    /// Namespace searched when a caller names none.
    #[serde(default = "default_search_namespace")]
    pub search_namespace: String,

    /// Field weights of the search index.
    #[serde(default = "default_search_weights")]
    pub search_weights: BTreeMap<String, f64>,

    /// Default maximum number of search hits.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Further namespaces `cache_search` may index and query.
    #[serde(default)]
    pub extra_search_namespaces: Vec<String>,

    /// Producers by identity, e.g. `[producers.summary]`.
    #[serde(default)]
    pub producers: BTreeMap<String, ProducerCommand>,
}

fn default_durable_backend() -> DurableBackend {
    DurableBackend::Sqlite
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./recall-cache.sqlite")
}

fn default_file_root() -> PathBuf {
    PathBuf::from("./recall-cache")
}

fn default_ephemeral_backend() -> EphemeralBackend {
    EphemeralBackend::Memory
}

fn default_ephemeral_capacity() -> u64 {
    10_000
}

fn default_ephemeral_ttl_secs() -> u64 {
    3_600
}

fn default_job_marker_ttl_secs() -> u64 {
    120
}

fn default_lock_ttl_secs() -> u64 {
    300
}

fn default_lock_category() -> String {
    "lock".into()
}

fn default_schedule_delay_ms() -> u64 {
    1_000
}

fn default_worker_count() -> usize {
    4
}

fn default_producer_timeout_ms() -> u64 {
    60_000
}

fn default_search_namespace() -> String {
    "summaries".into()
}

fn default_search_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([("tldr".into(), 10.0), ("summary".into(), 8.0), ("takeaways".into(), 8.0)])
}

fn default_search_limit() -> usize {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            durable_backend: default_durable_backend(),
            db_path: default_db_path(),
            file_root: default_file_root(),
            ephemeral_backend: default_ephemeral_backend(),
            ephemeral_capacity: default_ephemeral_capacity(),
            ephemeral_ttl_secs: default_ephemeral_ttl_secs(),
            job_marker_ttl_secs: default_job_marker_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_category: default_lock_category(),
            schedule_delay_ms: default_schedule_delay_ms(),
            worker_count: default_worker_count(),
            producer_timeout_ms: default_producer_timeout_ms(),
            search_namespace: default_search_namespace(),
            search_weights: default_search_weights(),
            search_limit: default_search_limit(),
            extra_search_namespaces: Vec::new(),
            producers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Whether searches may build and read an index for `namespace`.
    pub fn is_searchable(&self, namespace: &str) -> bool {
        namespace == self.search_namespace || self.extra_search_namespaces.iter().any(|n| n == namespace)
    }

    pub fn ephemeral_ttl(&self) -> Duration {
        Duration::from_secs(self.ephemeral_ttl_secs)
    }

    pub fn job_marker_ttl(&self) -> Duration {
        Duration::from_secs(self.job_marker_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn schedule_delay(&self) -> Duration {
        Duration::from_millis(self.schedule_delay_ms)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    /// Search weights as a validated table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the table is empty or holds a
    /// non-positive weight.
    pub fn field_weights(&self) -> Result<FieldWeights, ConfigError> {
        FieldWeights::new(self.search_weights.iter().map(|(k, v)| (k.clone(), *v)))
            .map_err(|e| ConfigError::Invalid { field: "search_weights".into(), reason: e.to_string() })
    }

    /// Load from defaults, the optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LoadFailed` when a source cannot be read or
    /// parsed, and `ConfigError::Invalid` when validation rejects a value.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// Layered sources without extraction; exposed so callers can merge more.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RECALL_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("RECALL_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LoadFailed` on extraction errors and
    /// `ConfigError::Invalid` when validation rejects a value.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.durable_backend, DurableBackend::Sqlite);
        assert_eq!(config.ephemeral_backend, EphemeralBackend::Memory);
        assert_eq!(config.db_path, PathBuf::from("./recall-cache.sqlite"));
        assert_eq!(config.job_marker_ttl(), Duration::from_secs(120));
        assert_eq!(config.lock_ttl(), Duration::from_secs(300));
        assert_eq!(config.lock_category, "lock");
        assert_eq!(config.schedule_delay(), Duration::from_millis(1_000));
        assert_eq!(config.search_weights.get("tldr"), Some(&10.0));
    }

    #[test]
    fn test_field_weights_from_defaults() {
        let weights = AppConfig::default().field_weights().unwrap();
        assert_eq!(weights.len(), 3);
        assert_eq!(weights.get("summary"), Some(8.0));
    }

    #[test]
    fn test_figment_toml_and_overrides() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(
            r#"
            durable_backend = "file"
            lock_ttl_secs = 30

            [search_weights]
            title = 4.0
            "#,
        ));
        let config = AppConfig::from_figment(figment).unwrap();
        assert_eq!(config.durable_backend, DurableBackend::File);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.search_weights.get("title"), Some(&4.0));
    }

    #[test]
    fn test_figment_producers_table() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(
            r#"
            [producers.summary]
            program = "/usr/local/bin/summarize"
            args = ["--model", "small"]
            "#,
        ));
        let config = AppConfig::from_figment(figment).unwrap();
        let summary = &config.producers["summary"];
        assert_eq!(summary.program, PathBuf::from("/usr/local/bin/summarize"));
        assert_eq!(summary.args, vec!["--model", "small"]);
    }

    #[test]
    fn test_figment_rejects_unknown_backend() {
        let figment =
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(r#"durable_backend = "mongo""#));
        assert!(matches!(AppConfig::from_figment(figment), Err(ConfigError::LoadFailed(_))));
    }
}

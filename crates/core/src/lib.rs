//! Core types and storage for recall.
//!
//! This crate provides:
//! - Durable stores (SQLite document database, JSON files) with a weighted text index
//! - Ephemeral TTL stores (moka in-process, shared SQLite table)
//! - Tagged producer results and per-request context
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod context;
pub mod error;
pub mod result;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use context::RequestContext;
pub use error::Error;
pub use result::TaggedResult;
pub use store::{
    DurableStore, EphemeralStore, FieldWeights, FileStore, MemoryStore, SearchHit, SqliteEphemeralStore, SqliteStore,
    Stores, TextQuery, open_stores,
};

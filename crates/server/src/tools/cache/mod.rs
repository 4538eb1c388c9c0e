//! Cache-related MCP tools.
//!
//! This module provides tools for reading, invalidating, searching and
//! purging cached results.

pub mod get;
pub mod invalidate;
pub mod purge;
pub mod search;

pub use get::{CacheGetParams, get_impl};
pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use purge::{CachePurgeParams, purge_impl};
pub use search::{CacheSearchParams, search_impl};

//! SQLite-backed document store.
//!
//! Uses tokio-rusqlite so every statement runs on the connection's background
//! thread. WAL mode lets several processes share the same file.

pub mod connection;
pub mod documents;
pub mod ephemeral;
pub mod migrations;
pub mod text_index;

pub use connection::SqliteStore;
pub use ephemeral::SqliteEphemeralStore;

//! Shared TTL entries on SQLite.
//!
//! Every process that opens the same database sees the same lock entries and
//! job markers. Set-if-absent is one `INSERT … ON CONFLICT DO UPDATE … WHERE`
//! statement, so exactly one concurrent caller wins.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use crate::Error;
use crate::store::EphemeralStore;

/// TTL key/value table sharing a [`super::SqliteStore`] connection.
#[derive(Clone, Debug)]
pub struct SqliteEphemeralStore {
    conn: Connection,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl SqliteEphemeralStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EphemeralStore for SqliteEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let key = key.to_string();
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<Option<Value>, Error> {
                let json: Option<String> = conn
                    .query_row(
                        "SELECT value_json FROM ephemeral_entries WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                match json {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), Error> {
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        let expires_at = expiry_ms(ttl);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO ephemeral_entries (key, value_json, expires_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value_json = excluded.value_json,
                        expires_at = excluded.expires_at",
                    params![key, json, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn set_if_absent(&self, key: &str, value: &Value, ttl: Duration) -> Result<bool, Error> {
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        let now = now_ms();
        let expires_at = expiry_ms(ttl);
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                // An expired row counts as absent and is taken over in place.
                let changed = conn.execute(
                    "INSERT INTO ephemeral_entries (key, value_json, expires_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value_json = excluded.value_json,
                        expires_at = excluded.expires_at
                    WHERE ephemeral_entries.expires_at <= ?4",
                    params![key, json, expires_at, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM ephemeral_entries WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_if_eq(&self, key: &str, expected: &Value) -> Result<bool, Error> {
        let key = key.to_string();
        let json = serde_json::to_string(expected)?;
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute(
                    "DELETE FROM ephemeral_entries WHERE key = ?1 AND value_json = ?2 AND expires_at > ?3",
                    params![key, json, now],
                )?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM ephemeral_entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

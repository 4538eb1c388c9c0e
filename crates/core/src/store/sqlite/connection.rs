//! Opening the SQLite database: parent directories, pragmas, migrations.

use super::ephemeral::SqliteEphemeralStore;
use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

/// WAL lets readers in other processes proceed during a write; the busy
/// timeout covers writers racing for the lock.
const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA busy_timeout=5000;
     PRAGMA foreign_keys=ON;";

/// Durable document store on SQLite.
///
/// Statements run on tokio-rusqlite's background thread. Clones share the
/// connection, which is how [`SqliteStore::ephemeral`] shares the database.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open or create the database file at `path`, creating missing parent
    /// directories, then bring the schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Private in-memory database; nothing outlives the handle.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS))
            .await
            .map_err(Error::from)?;

        migrations::run(&conn).await?;
        let schema_version = migrations::schema_version(&conn).await?;
        tracing::debug!(schema_version, "sqlite store ready");

        Ok(Self { conn })
    }

    /// Ephemeral TTL store sharing this connection.
    pub fn ephemeral(&self) -> SqliteEphemeralStore {
        SqliteEphemeralStore::new(self.conn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteStore::open(dir.path().join("recall.sqlite")).await.unwrap();
        let mode = db
            .conn
            .call(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/recall.sqlite");
        SqliteStore::open(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_documents() {
        use crate::store::DurableStore;
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recall.sqlite");
        SqliteStore::open(&path).await.unwrap().put("videos", "v1", &json!(1)).await.unwrap();

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("videos", "v1").await.unwrap(), Some(json!(1)));
    }
}

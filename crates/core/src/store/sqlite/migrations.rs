//! Versioned schema migrations, tracked in `PRAGMA user_version`.

use crate::Error;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::TransactionBehavior;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; each version is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "documents", sql: include_str!("../../../migrations/001_documents.sql") },
    Migration { version: 2, name: "text_index", sql: include_str!("../../../migrations/002_text_index.sql") },
    Migration { version: 3, name: "ephemeral", sql: include_str!("../../../migrations/003_ephemeral.sql") },
];

/// Apply every migration newer than the database's schema version.
///
/// The check and the batches share one immediate transaction, so two
/// processes opening a fresh file cannot both apply a version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the version whose SQL failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: i64 = tx.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            tx.execute_batch(migration.sql).map_err(|e| {
                Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name))
            })?;
            tx.pragma_update(None, "user_version", migration.version)?;
            tracing::debug!(version = migration.version, name = migration.name, "applied migration");
        }

        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}

/// Schema version currently recorded in the database.
pub async fn schema_version(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| conn.pragma_query_value(None, "user_version", |row| row.get(0)))
        .await
        .map_err(Error::from)
}

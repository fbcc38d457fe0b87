pub mod schema;

use crate::error::SyncError;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Gibt den Pfad zum Datenbank-Verzeichnis zurück
pub fn get_database_path() -> PathBuf {
    PathBuf::from("./data/kellerbuch.db")
}

/// Shared handle to the SQLite database.
///
/// All components (local store, both outboxes, settings) clone this handle;
/// the connection mutex is what makes outbox sequence assignment unique and
/// monotonic across concurrent call sites.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the database at the given path and
    /// initializes the full schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens the database at the default application path.
    pub fn open_default() -> Result<Self, SyncError> {
        Self::open(get_database_path())
    }

    /// In-memory database with the full schema, for tests and previews.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure against the connection under the mutex.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Runs a closure inside a transaction, committing on success.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        // Four entity tables, two outboxes, settings, schema_version
        assert!(count >= 8);
    }
}

//! Persistent identity store.
//!
//! [`IdentityStore`] is what the pipeline needs from persistence;
//! [`SqliteStore`] is the stock implementation backed by a single
//! `faces` table.

use crate::types::{Embedding, Identity};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt feature blob for identity {0}")]
    CorruptFeature(u32),
    #[error("identity {0} already exists")]
    Duplicate(u32),
}

pub trait IdentityStore: Send + Sync {
    /// Id to assign to the next enrolled identity.
    fn next_id(&self) -> Result<u32, StoreError>;

    /// Stored display name for `id`, if the identity exists.
    fn exists(&self, id: u32) -> Result<Option<String>, StoreError>;

    /// Insert a new identity. An id already in use is a
    /// [`StoreError::Duplicate`].
    fn insert(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Returns `false` when no identity had that id.
    fn delete(&self, id: u32) -> Result<bool, StoreError>;

    /// Up to `capacity` identities, ordered by id.
    fn load_all(&self, capacity: usize) -> Result<Vec<Identity>, StoreError>;

    /// Directory where live enrollment pictures are written. Live
    /// enrollment is refused while this is `None`.
    fn allow_list_dir(&self) -> Option<PathBuf>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    feature     BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
";

/// SQLite-backed [`IdentityStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    allow_list_dir: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, allow_list_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened identity store");
        Self::with_connection(conn, allow_list_dir)
    }

    pub fn open_in_memory(allow_list_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, allow_list_dir)
    }

    fn with_connection(conn: Connection, allow_list_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            allow_list_dir,
        })
    }
}

impl IdentityStore for SqliteStore {
    fn next_id(&self) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM faces", [], |row| row.get(0))?;
        Ok(id as u32)
    }

    fn exists(&self, id: u32) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let name = conn
            .query_row("SELECT name FROM faces WHERE id = ?1", params![id as i64], |row| row.get(0))
            .optional()?;
        Ok(name)
    }

    fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO faces (id, name, feature, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.id as i64,
                identity.name,
                identity.embedding.to_le_bytes(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Duplicate(identity.id)
            }
            other => StoreError::Sqlite(other),
        })?;
        tracing::debug!(id = identity.id, name = %identity.name, "identity stored");
        Ok(())
    }

    fn delete(&self, id: u32) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM faces WHERE id = ?1", params![id as i64])?;
        Ok(changed > 0)
    }

    fn load_all(&self, capacity: usize) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, feature FROM faces ORDER BY id LIMIT ?1")?;
        let rows = stmt.query_map(params![capacity as i64], |row| {
            Ok((
                row.get::<_, i64>(0)? as u32,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let embedding = Embedding::from_le_bytes(&blob).ok_or(StoreError::CorruptFeature(id))?;
            identities.push(Identity { id, name, embedding });
        }
        Ok(identities)
    }

    fn allow_list_dir(&self) -> Option<PathBuf> {
        self.allow_list_dir.clone()
    }
}

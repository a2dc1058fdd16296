use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;
use crate::traits::{SnapshotStore, StorageKey};

/// Snapshot store backed by a sqlite file, so pending edits survive a
/// process restart.
pub struct SqliteSnapshotStore {
    conn: Connection,
}

impl SqliteSnapshotStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        tracing::debug!(path, "opened snapshot store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Escape LIKE wildcards so a prefix is matched literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

impl SnapshotStore for SqliteSnapshotStore {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots WHERE key = ?1",
                rusqlite::params![key.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put(&mut self, key: &StorageKey, payload: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO snapshots (key, payload) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, written_at = excluded.written_at",
            rusqlite::params![key.as_str(), payload],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &StorageKey) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM snapshots WHERE key = ?1",
            rusqlite::params![key.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<StorageKey>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM snapshots WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let keys = stmt
            .query_map(rusqlite::params![like_prefix(prefix)], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        // LIKE is case-insensitive for ASCII; keys are not.
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .map(StorageKey::from_raw)
            .collect())
    }
}

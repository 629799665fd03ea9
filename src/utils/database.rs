//! SQLite persistence backend for checkpoint and subscribers

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::utils::storage::{
    Checkpoint, CheckpointStore, RecipientId, StorageError, StorageResult, SubscriberStore,
};

/// SQLite database service
pub struct DatabaseService {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseService {
    /// Open (or create) the database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let service = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        service.initialize()?;
        Ok(service)
    }

    fn initialize(&self) -> StorageResult<()> {
        let conn = self.conn.lock();

        // Single-row checkpoint
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                height INTEGER NOT NULL,
                written_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                chat_id INTEGER PRIMARY KEY
            )
            "#,
            [],
        )?;

        info!(target: "DATABASE", "Initialized successfully");
        Ok(())
    }
}

impl CheckpointStore for DatabaseService {
    fn load(&self) -> StorageResult<Option<Checkpoint>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT height, written_at FROM checkpoint WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(height, written_at)| Checkpoint {
            height: height.max(0) as u64,
            written_at: Utc
                .timestamp_millis_opt(written_at)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    fn save(&self, height: u64) -> StorageResult<Checkpoint> {
        let checkpoint = Checkpoint::now(height);
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO checkpoint (id, height, written_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET height = excluded.height, written_at = excluded.written_at
            "#,
            params![
                i64::try_from(height).unwrap_or(i64::MAX),
                checkpoint.written_at.timestamp_millis()
            ],
        )?;
        Ok(checkpoint)
    }
}

impl SubscriberStore for DatabaseService {
    fn load(&self) -> StorageResult<BTreeSet<RecipientId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chat_id FROM subscribers")?;
        let rows = stmt.query_map([], |row| Ok(RecipientId(row.get(0)?)))?;

        let mut subscribers = BTreeSet::new();
        for row in rows {
            subscribers.insert(row?);
        }
        Ok(subscribers)
    }

    fn save(&self, subscribers: &BTreeSet<RecipientId>) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM subscribers", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO subscribers (chat_id) VALUES (?1)")?;
            for id in subscribers {
                stmt.execute(params![id.0])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Clone for DatabaseService {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::storage::tests::temp_path;
    use pretty_assertions::assert_eq;

    #[test]
    fn checkpoint_absent_then_upserted() {
        let db = DatabaseService::in_memory().unwrap();
        assert_eq!(CheckpointStore::load(&db).unwrap(), None);

        CheckpointStore::save(&db, 1000).unwrap();
        CheckpointStore::save(&db, 1005).unwrap();
        assert_eq!(CheckpointStore::load(&db).unwrap().unwrap().height, 1005);
    }

    #[test]
    fn subscriber_save_overwrites_the_full_set() {
        let db = DatabaseService::in_memory().unwrap();
        let first: BTreeSet<_> = [RecipientId(1), RecipientId(2)].into_iter().collect();
        let second: BTreeSet<_> = [RecipientId(2), RecipientId(3)].into_iter().collect();

        SubscriberStore::save(&db, &first).unwrap();
        SubscriberStore::save(&db, &second).unwrap();
        assert_eq!(SubscriberStore::load(&db).unwrap(), second);
    }

    #[test]
    fn state_survives_reopening_the_file() {
        let path = temp_path("whale-alert.db");
        {
            let db = DatabaseService::new(&path).unwrap();
            CheckpointStore::save(&db, 77).unwrap();
            SubscriberStore::save(&db, &[RecipientId(-100)].into_iter().collect()).unwrap();
        }

        let db = DatabaseService::new(&path).unwrap();
        assert_eq!(CheckpointStore::load(&db).unwrap().unwrap().height, 77);
        assert!(SubscriberStore::load(&db).unwrap().contains(&RecipientId(-100)));
    }
}

//! Durable store using redb.
//!
//! A single table maps string keys to string values, giving ACID writes for
//! the handful of keys a session persists.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use super::LocalStore;
use crate::error::SyncError;

/// Table holding every persisted key
const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("kv");

/// [`LocalStore`] persisted in a redb database file
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<RwLock<Database>>,
}

impl RedbStore {
    /// Open or create a store at the given path.
    ///
    /// This will:
    /// - Create the parent directory if it doesn't exist
    /// - Initialize the database file
    /// - Create the key-value table
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KV_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }
}

impl LocalStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;

        match table.get(key)? {
            Some(v) => Ok(Some(v.value().to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbStore::open(temp_dir.path().join("test.redb")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("store.redb");
        let _store = RedbStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _dir) = create_test_store();
        assert!(store.get("room").unwrap().is_none());

        store.set("room", "abc123").unwrap();
        assert_eq!(store.get("room").unwrap().as_deref(), Some("abc123"));

        store.set("room", "xyz789").unwrap();
        assert_eq!(store.get("room").unwrap().as_deref(), Some("xyz789"));

        store.remove("room").unwrap();
        assert!(store.get("room").unwrap().is_none());
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.set("likes", "[\"Emma\"]").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("likes").unwrap().as_deref(), Some("[\"Emma\"]"));
    }
}

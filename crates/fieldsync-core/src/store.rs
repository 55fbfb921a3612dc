//! Durable store: transactional keyed persistence using redb
//!
//! Both queues sit on top of this primitive. Keys are strings, values are
//! opaque byte slices; every operation runs inside a redb transaction that
//! commits fully or not at all.
//!
//! The one contract worth calling out is [`Store::remove_if_present`]: the
//! underlying delete signal is not trusted on its own, so the store re-checks
//! non-existence after the delete and reports a verified boolean. Callers
//! never re-implement that check ad hoc.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

/// Transactional keyed store backed by a single redb table
#[derive(Clone)]
pub struct Store {
    db: Arc<RwLock<Database>>,
    table: &'static str,
}

impl Store {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StorageUnavailable` if the environment cannot
    /// provide persistent storage at that location.
    pub fn open(path: impl AsRef<Path>, table: &'static str) -> SyncResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        }

        let db = Database::create(path).map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(Self::definition(table))?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            table,
        })
    }

    fn definition(table: &'static str) -> TableDefinition<'static, &'static str, &'static [u8]> {
        TableDefinition::new(table)
    }

    /// Atomic upsert of a value under a key
    pub fn put(&self, key: &str, value: &[u8]) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(Self::definition(self.table))?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a value by key. Returns `None` if the key is absent.
    pub fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(Self::definition(self.table))?;

        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Idempotent verified delete.
    ///
    /// Returns `true` only when the key existed beforehand and is verifiably
    /// gone afterwards. The delete's own success signal is ignored; absence is
    /// re-checked with a fresh read.
    pub fn remove_if_present(&self, key: &str) -> SyncResult<bool> {
        if self.get(key)?.is_none() {
            return Ok(false);
        }

        {
            let db = self.db.read();
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(Self::definition(self.table))?;
                let _ = table.remove(key)?;
            }
            write_txn.commit()?;
        }

        Ok(self.get(key)?.is_none())
    }

    /// All entries whose key starts with the given prefix.
    ///
    /// The scan is finite and restartable per call; order is store-native
    /// (lexicographic by key), not insertion order.
    pub fn scan(&self, prefix: &str) -> SyncResult<Vec<(String, Vec<u8>)>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(Self::definition(self.table))?;

        let mut entries = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, value) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    /// Remove every entry
    pub fn clear(&self) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let definition = Self::definition(self.table);
            write_txn.delete_table(definition)?;
            let _ = write_txn.open_table(definition)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = Store::open(&db_path, "test").unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_store_can_be_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        assert!(Store::open(&db_path, "test").is_ok());
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let store = Store::open(&db_path, "test");
        assert!(store.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_test_store();

        store.put("a", b"alpha").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites() {
        let (store, _temp) = create_test_store();

        store.put("a", b"first").unwrap();
        store.put("a", b"second").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_remove_if_present_reports_verified_result() {
        let (store, _temp) = create_test_store();

        store.put("a", b"alpha").unwrap();
        assert!(store.remove_if_present("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);

        // absent key: idempotent, reports false
        assert!(!store.remove_if_present("a").unwrap());
        assert!(!store.remove_if_present("never-existed").unwrap());
    }

    #[test]
    fn test_scan_by_prefix() {
        let (store, _temp) = create_test_store();

        store.put("streets/1", b"a").unwrap();
        store.put("streets/2", b"b").unwrap();
        store.put("parcels/1", b"c").unwrap();

        let streets = store.scan("streets/").unwrap();
        assert_eq!(streets.len(), 2);
        assert!(streets.iter().all(|(k, _)| k.starts_with("streets/")));

        let all = store.scan("").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_scan_is_restartable() {
        let (store, _temp) = create_test_store();

        store.put("k/1", b"a").unwrap();
        let first = store.scan("k/").unwrap();
        let second = store.scan("k/").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clear() {
        let (store, _temp) = create_test_store();

        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();
        store.clear().unwrap();
        assert!(store.scan("").unwrap().is_empty());
    }

    #[test]
    fn test_values_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let store = Store::open(&db_path, "test").unwrap();
            store.put("a", b"alpha").unwrap();
        }

        {
            let store = Store::open(&db_path, "test").unwrap();
            assert_eq!(store.get("a").unwrap(), Some(b"alpha".to_vec()));
        }
    }
}

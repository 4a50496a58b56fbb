//! Sled-backed durable store

use crate::error::StorageError;
use crate::store::DurableStore;
use std::path::Path;

/// Sled-based implementation of DurableStore
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a sled database at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(to_storage_io)?;
        Ok(Self { db })
    }

    /// Wrap an already opened database (shared with other components)
    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Check if a key exists in the store
    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        self.db.contains_key(key.as_bytes()).map_err(to_storage_io)
    }
}

impl DurableStore for SledStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.db.get(key.as_bytes()).map_err(to_storage_io)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), bytes).map_err(to_storage_io)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes()).map_err(to_storage_io)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.map_err(to_storage_io)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Codec(format!("Non UTF-8 key in store: {}", e)))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("sled error: {}", err),
    ))
}

//! Durable Store
//!
//! Byte-oriented key/value persistence used as the durable cache tier and as the
//! checkpoint store. Keys are UTF-8 strings with a namespace prefix
//! (`cache:`, `checkpoint:`), so one backend can serve both roles.

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::SledStore;

use crate::error::StorageError;

/// Durable store interface
pub trait DurableStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

//! Durable key-value storage used by the session bridge.
//!
//! The contract mirrors browser local storage: string keys, string values,
//! and a change feed for writes that go through the same backend. Writes made
//! by other processes are not announced; the bridge poll picks those up.

mod file;
pub mod keys;
mod memory;

pub use file::FileStorage;
pub use keys::SessionKeys;
pub use memory::MemoryStorage;

use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the change feed. Slow subscribers see `Lagged` and resync.
pub(crate) const EVENT_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
}

/// A write observed on the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed
    pub new_value: Option<String>,
}

pub trait DurableStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Subscribe to writes made through this backend
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

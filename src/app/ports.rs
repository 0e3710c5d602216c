//! Port traits: the boundary between the engine and its surroundings.
//!
//! ```text
//!   Transport ──▶ BusEngine ──▶ EventSink
//!                    │
//!                    └──▶ StoragePort (role preferences)
//! ```
//!
//! The byte transport lives in [`crate::packet::transport`]; everything
//! else the engine talks to is declared here.

use core::fmt;
use std::collections::HashMap;

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Event sink port (engine → consumers)
// ───────────────────────────────────────────────────────────────

/// Receives every [`AppEvent`] the engine produces, in order.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

/// Collects events; the usual sink in tests.
impl EventSink for Vec<AppEvent> {
    fn emit(&mut self, event: &AppEvent) {
        self.push(event.clone());
    }
}

// ───────────────────────────────────────────────────────────────
// Storage port (engine ↔ persistent key-value store)
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value storage.  Writes must be atomic.
pub trait StoragePort {
    /// Stored bytes, or `None` when the key is absent.
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Ok even if the key did not exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Full,
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for StorageError {}

/// In-memory [`StoragePort`] for simulation and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<(String, String), Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StoragePort for MemoryStorage {
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .entries
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.entries
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }
}

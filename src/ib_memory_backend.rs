// In-memory state backend.
//
// The simplest backend: a flat map of named keys to JSON strings, the
// local-storage analogue. Ideal for tests, simulation, and the demo
// binary. For durable storage, see ib_json_backend.rs.

use hashbrown::HashMap;

use crate::ib_interface::{LedgerError, StateBackend};

/// Volatile key/value backend. Never fails.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), LedgerError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), LedgerError> {
        self.entries.remove(key);
        Ok(())
    }
}

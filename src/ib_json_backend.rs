// JSON-file state backend.
//
// Persists the whole key/value table as one JSON document, rewritten on
// every write. At personal-wallet scale that is cheaper than getting
// partial-write recovery right. For testing and simulation, see
// ib_memory_backend.rs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ib_interface::{LedgerError, StateBackend};

/// Durable key/value backend over a single JSON file.
///
/// A missing file opens as an empty table; a corrupt file is a `Parse`
/// error (the caller decides whether to start fresh). I/O failures map to
/// `Transport`: infrastructure trouble, not bad data.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                LedgerError::Transport(format!("read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&raw)
                .map_err(|e| LedgerError::Parse(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };

        log::debug!(
            "json backend opened {} ({} keys)",
            path.display(),
            entries.len()
        );
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), LedgerError> {
        let raw = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| LedgerError::Parse(e.to_string()))?;
        fs::write(&self.path, raw)
            .map_err(|e| LedgerError::Transport(format!("write {}: {e}", self.path.display())))
    }
}

impl StateBackend for JsonFileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), LedgerError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn delete(&mut self, key: &str) -> Result<(), LedgerError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

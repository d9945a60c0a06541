// Configuration loading.
//
// All fields are optional in the file: missing fields take defaults,
// unknown fields are ignored, and no file at all means "all defaults".

use std::path::Path;

use serde::Deserialize;

use crate::ib_feed::DEFAULT_FEED_CAPACITY;
use crate::ib_interface::{LedgerError, PeerId};

/// Top-level ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum number of wallet feed entries kept (oldest evicted first).
    pub feed_capacity: usize,

    pub p2p: P2pConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            feed_capacity: DEFAULT_FEED_CAPACITY,
            p2p: P2pConfig::default(),
        }
    }
}

/// P2P replication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Subscribe to token events on `enable()` and broadcast each to
    /// connected peers.
    pub auto_sync: bool,

    /// Fixed local peer id; generated per session when absent.
    pub peer_id: Option<PeerId>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            peer_id: None,
        }
    }
}

impl LedgerConfig {
    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, LedgerError> {
        serde_yaml::from_str(raw).map_err(|e| LedgerError::Parse(format!("config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.feed_capacity, DEFAULT_FEED_CAPACITY);
        assert!(config.p2p.auto_sync);
        assert!(config.p2p.peer_id.is_none());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = LedgerConfig::from_yaml("p2p:\n  auto_sync: false\n").unwrap();
        assert!(!config.p2p.auto_sync);
        assert_eq!(config.feed_capacity, DEFAULT_FEED_CAPACITY);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
feed_capacity: 10
p2p:
  auto_sync: true
  peer_id: peer_cafe0001
"#;
        let config = LedgerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.feed_capacity, 10);
        assert_eq!(config.p2p.peer_id.as_deref(), Some("peer_cafe0001"));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = LedgerConfig::from_yaml("feed_capacity: [oops").unwrap_err();
        assert!(matches!(err, LedgerError::Parse(_)));
    }
}

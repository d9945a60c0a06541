// Core types shared across the ledger: token records, events, errors,
// the peer wire message and the state-backend seam.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque token identifier, assigned at creation, immutable.
/// Format: `tok_` followed by 16 lowercase hex digits.
pub type TokenId = String;

/// Peer session identifier. Generated locally (`peer_` + 8 hex digits)
/// when not supplied by configuration.
pub type PeerId = String;

// ============================================================================
// Currency
// ============================================================================

/// The closed set of token currencies.
///
/// Deliberately not open for extension without a code change: the stats
/// aggregator promises a fixed-shape `by_type` output keyed by exactly
/// these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "infinity_tokens")]
    Infinity,
    #[serde(rename = "research_tokens")]
    Research,
    #[serde(rename = "art_tokens")]
    Art,
    #[serde(rename = "music_tokens")]
    Music,
}

impl Currency {
    /// All currencies, in stable aggregation order.
    pub const ALL: [Currency; 4] = [
        Currency::Infinity,
        Currency::Research,
        Currency::Art,
        Currency::Music,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Infinity => "infinity_tokens",
            Currency::Research => "research_tokens",
            Currency::Art => "art_tokens",
            Currency::Music => "music_tokens",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    /// Parse a currency at the string boundary (UI input, wire data).
    /// Anything outside the four enumerated values is a `Validation` error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infinity_tokens" => Ok(Currency::Infinity),
            "research_tokens" => Ok(Currency::Research),
            "art_tokens" => Ok(Currency::Art),
            "music_tokens" => Ok(Currency::Music),
            other => Err(LedgerError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

// ============================================================================
// Token record
// ============================================================================

/// A named, typed unit of value tracked by the ledger.
///
/// Container-level `#[serde(default)]` keeps older persisted shapes
/// readable: missing fields load as their defaults rather than failing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    pub id: TokenId,
    pub name: String,
    pub symbol: String,
    pub currency: Currency,
    /// Quantity in the token's internal denomination.
    pub amount: f64,
    /// Monetary value in the reference currency.
    pub value: f64,
    /// Optional free-text provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Open-ended key/value map.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input to `TokenStore::create`. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct TokenDraft {
    pub name: String,
    pub symbol: String,
    pub currency: Currency,
    pub amount: f64,
    pub value: f64,
    pub source: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Partial update for `TokenStore::update`. `Some` fields replace the
/// existing field wholesale (including `metadata`); `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub currency: Option<Currency>,
    pub amount: Option<f64>,
    pub value: Option<f64>,
    pub source: Option<String>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

// ============================================================================
// Events
// ============================================================================

/// Kind of token mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token mutation notification. Carries the full record snapshot at the
/// time of the event, not a delta: for `Deleted` this is the pre-deletion
/// record so subscribers can still display what was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEvent {
    pub kind: EventKind,
    pub token: Token,
}

// ============================================================================
// Peer wire message
// ============================================================================

/// Message exchanged between peers over a reliable ordered data channel,
/// encoded as a UTF-8 JSON string:
///
/// ```json
/// { "type": "token-event", "event": "created", "token": { ... },
///   "timestamp": "2024-01-01T00:00:00Z", "from": "peer_0a1b2c3d" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    #[serde(rename = "token-event")]
    TokenEvent {
        event: EventKind,
        token: Token,
        timestamp: DateTime<Utc>,
        from: PeerId,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Ledger error taxonomy.
///
/// `Validation` and `NotFound` are surfaced synchronously to the caller.
/// `Transport` and `Parse` are local-recovery errors: logged and isolated
/// to the failing peer or message, never fatal to an operation in flight.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unknown token id: {0}")]
    NotFound(TokenId),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    Parse(String),
}

// ============================================================================
// State backend seam
// ============================================================================

/// String key/value persistence for JSON-serialized state.
///
/// Models a local-storage-style table of named keys. The Token Store is
/// the sole writer of the token-state keys; other components may keep
/// their own keys but never touch the store's.
pub trait StateBackend {
    /// Read the value under `key`, `None` if absent.
    fn read(&self, key: &str) -> Result<Option<String>, LedgerError>;

    /// Write `value` under `key`, replacing any previous value.
    fn write(&mut self, key: &str, value: &str) -> Result<(), LedgerError>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn delete(&mut self, key: &str) -> Result<(), LedgerError>;
}

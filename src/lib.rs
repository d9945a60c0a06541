//! # Infinity Ledger - Event-Sourced Token Wallet Core
//!
//! A Rust implementation of an event-notifying token ledger with
//! multi-subscriber fan-out and an optional peer replication layer.
//! Every token mutation flows through a single synchronous pipeline:
//! store mutation, persistence, then emitter fan-out to however many
//! subscribers are registered (wallet feed, peer broadcast, host code).
//!
//! ## Core Components
//!
//! - **TokenStore**: authoritative CRUD over token records; assigns
//!   identity, persists state, emits exactly one event per mutation
//! - **EventEmitter**: synchronous pub/sub fan-out in registration order
//! - **LedgerStats**: pull-based summary recomputed from a fresh snapshot
//! - **WalletFeed**: bounded, human-readable activity log subscriber
//! - **P2pSync**: peer registry and replication stub that broadcasts
//!   token events to connected peers and surfaces inbound peer events to
//!   the host without merging them locally
//!
//! ## Usage with a Transport Layer
//!
//! The library is transport-agnostic. To replicate across peers you:
//! 1. Implement `SignalingChannel`/`PeerTransport` over your transport
//! 2. Call `connect_to_peer` and feed connection-state callbacks into
//!    `handle_transport_state`
//! 3. Feed inbound data-channel messages into `handle_peer_message`
//!
//! ```no_run
//! use ib_ledger::{EventEmitter, LedgerStats, MemoryBackend, TokenDraft, TokenStore};
//!
//! let emitter = EventEmitter::new();
//! let mut store = TokenStore::open(MemoryBackend::new(), emitter.clone())?;
//!
//! let token = store.create(TokenDraft {
//!     name: "Infinity Credit".into(),
//!     symbol: "INF".into(),
//!     amount: 100.0,
//!     value: 50.0,
//!     ..TokenDraft::default()
//! })?;
//!
//! let stats = LedgerStats::compute(&store);
//! assert_eq!(stats.total, 1);
//! # Ok::<(), ib_ledger::LedgerError>(())
//! ```
//!
//! ## Concurrency Model
//!
//! Single-threaded and host-driven: mutations, fan-out and stats run to
//! completion on the calling turn, so the store needs no locking. The
//! P2P layer's externally-driven callbacks are modelled as host calls;
//! they treat the peer registry as the single source of truth and assume
//! no ordering across peers.

// Core ledger modules
pub mod ib_config;
pub mod ib_emitter;
pub mod ib_feed;
pub mod ib_interface;
pub mod ib_p2p;
pub mod ib_stats;
pub mod ib_store;

// Storage backends
pub mod ib_memory_backend;

#[cfg(feature = "file-backend")]
pub mod ib_json_backend;

// Re-export commonly used types
pub use ib_config::{LedgerConfig, P2pConfig};
pub use ib_emitter::{EventEmitter, EventHandler, Subscription};
pub use ib_feed::{FeedEvent, WalletFeed, DEFAULT_FEED_CAPACITY};
pub use ib_interface::{
    Currency, EventKind, LedgerError, PeerId, PeerMessage, StateBackend, Token, TokenDraft,
    TokenEvent, TokenId, TokenPatch,
};
pub use ib_memory_backend::MemoryBackend;
pub use ib_p2p::{
    NoOpSink, P2pEvent, P2pEventSink, P2pSync, PeerTransport, SessionState, SignalingChannel,
    TransportFactory, TransportState,
};
pub use ib_stats::LedgerStats;
pub use ib_store::TokenStore;

#[cfg(feature = "file-backend")]
pub use ib_json_backend::JsonFileBackend;

// Wallet demo driver.
//
// Runs two ledger nodes wired through in-memory loopback transports:
// alice mints/transfers/burns tokens, her P2P layer broadcasts each
// event, and bob's node surfaces the inbound events to the host without
// touching his own store.
//
// Usage:
//   cargo run                      (defaults)
//   cargo run -- wallet.yaml       (load a YAML config)

use std::cell::RefCell;
use std::collections::VecDeque;
use std::env;
use std::rc::Rc;

use log::info;
use simple_logger::SimpleLogger;

use ib_ledger::{
    Currency, EventEmitter, EventKind, LedgerConfig, LedgerError, LedgerStats, MemoryBackend,
    P2pEvent, P2pEventSink, P2pSync, PeerId, PeerTransport, SignalingChannel, Token, TokenDraft,
    TokenPatch, TokenStore, TransportFactory, TransportState, WalletFeed,
};

// ============================================================================
// Loopback transport: every sent payload lands in a shared queue the
// driver drains and routes to the other node.
// ============================================================================

type Outbox = Rc<RefCell<VecDeque<String>>>;

struct LoopbackSignaling {
    open: bool,
}

impl SignalingChannel for LoopbackSignaling {
    fn open(&mut self) -> Result<(), LedgerError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, payload: &str) -> Result<(), LedgerError> {
        log::debug!("signaling relay: {payload}");
        Ok(())
    }
}

struct LoopbackTransport {
    open: bool,
    outbox: Outbox,
}

impl PeerTransport for LoopbackTransport {
    fn create_offer(&mut self) -> Result<String, LedgerError> {
        Ok("loopback-offer".to_string())
    }

    fn open_data_channel(&mut self) -> Result<(), LedgerError> {
        self.open = true;
        Ok(())
    }

    fn channel_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, payload: &str) -> Result<(), LedgerError> {
        self.outbox.borrow_mut().push_back(payload.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

struct LoopbackFactory {
    outbox: Outbox,
}

impl TransportFactory for LoopbackFactory {
    type Signaling = LoopbackSignaling;
    type Transport = LoopbackTransport;

    fn open_signaling(&mut self) -> Result<LoopbackSignaling, LedgerError> {
        Ok(LoopbackSignaling { open: false })
    }

    fn connect(&mut self, _peer: &PeerId) -> Result<LoopbackTransport, LedgerError> {
        Ok(LoopbackTransport {
            open: false,
            outbox: self.outbox.clone(),
        })
    }
}

/// Logs surfaced P2P events; remote token events are where a real host
/// would decide whether to reconcile.
struct LogSink {
    node: &'static str,
}

impl P2pEventSink for LogSink {
    fn notify(&mut self, event: P2pEvent) {
        match event {
            P2pEvent::RemoteTokenEvent {
                from,
                event,
                token,
                ..
            } => info!(
                "[{}] remote {} event from {}: {} {} ({})",
                self.node, event, from, token.amount, token.symbol, token.name
            ),
            other => log::debug!("[{}] {:?}", self.node, other),
        }
    }
}

fn main() {
    SimpleLogger::new().init().unwrap();

    let config = match env::args().nth(1) {
        Some(path) => LedgerConfig::from_yaml_file(&path).unwrap(),
        None => LedgerConfig::default(),
    };

    info!("starting wallet demo");
    run(config).unwrap();
}

fn run(config: LedgerConfig) -> Result<(), LedgerError> {
    // Alice: store + feed + replication
    let alice_emitter = EventEmitter::new();
    let mut alice_store = TokenStore::open(MemoryBackend::new(), alice_emitter.clone())?;
    let alice_feed = WalletFeed::attach(&alice_emitter, config.feed_capacity);

    let alice_outbox: Outbox = Rc::new(RefCell::new(VecDeque::new()));
    let mut alice_p2p = P2pSync::with_sink(
        LoopbackFactory {
            outbox: alice_outbox.clone(),
        },
        alice_emitter.clone(),
        config.p2p.clone(),
        Box::new(LogSink { node: "alice" }),
    );

    // Bob: replication only, to show the surface-don't-merge boundary
    let bob_emitter = EventEmitter::new();
    let bob_store = TokenStore::open(MemoryBackend::new(), bob_emitter.clone())?;
    let bob_outbox: Outbox = Rc::new(RefCell::new(VecDeque::new()));
    let mut bob_p2p = P2pSync::with_sink(
        LoopbackFactory { outbox: bob_outbox },
        bob_emitter,
        ib_ledger::P2pConfig {
            // A configured fixed id belongs to the local node only
            peer_id: None,
            ..config.p2p.clone()
        },
        Box::new(LogSink { node: "bob" }),
    );

    alice_p2p.enable()?;
    bob_p2p.enable()?;

    let bob_id: PeerId = bob_p2p.local_peer_id();
    let alice_id: PeerId = alice_p2p.local_peer_id();
    assert!(alice_p2p.connect_to_peer(&bob_id));
    // In a real deployment this transition arrives from the transport
    // once negotiation completes; the loopback connects instantly.
    alice_p2p.handle_transport_state(&bob_id, TransportState::Connected);

    // Mint, transfer, burn
    let credit = alice_store.create(TokenDraft {
        name: "Infinity Credit".into(),
        symbol: "INF".into(),
        currency: Currency::Infinity,
        amount: 100.0,
        value: 50.0,
        ..TokenDraft::default()
    })?;
    let study = alice_store.create(TokenDraft {
        name: "Study Grant".into(),
        symbol: "RSC".into(),
        currency: Currency::Research,
        amount: 40.0,
        value: 12.5,
        source: Some("faculty pool".into()),
        ..TokenDraft::default()
    })?;

    alice_store.update(
        &credit.id,
        TokenPatch {
            amount: Some(75.0),
            ..TokenPatch::default()
        },
    )?;
    alice_store.delete(&study.id)?;

    // Route alice's broadcasts into bob's node
    loop {
        let payload = alice_outbox.borrow_mut().pop_front();
        match payload {
            Some(payload) => bob_p2p.handle_peer_message(&alice_id, &payload),
            None => break,
        }
    }

    // Pull-based refresh, the way the wallet UI would do it
    if alice_feed.take_dirty() {
        let stats = LedgerStats::compute(&alice_store);
        info!(
            "[alice] {} tokens, total value {} ({} infinity / {} research / {} art / {} music)",
            stats.total,
            stats.total_value,
            stats.count(Currency::Infinity),
            stats.count(Currency::Research),
            stats.count(Currency::Art),
            stats.count(Currency::Music),
        );
        for entry in alice_feed.entries() {
            info!("[alice] feed #{}: {}", entry.id, entry.message);
        }
    }

    // Inbound events were surfaced to bob's host, never applied
    assert!(bob_store.is_empty());
    info!(
        "[bob] store still holds {} tokens (peer events surfaced, not merged)",
        bob_store.len()
    );

    let live: Vec<Token> = alice_store.get_all();
    info!(
        "[alice] done: {} live tokens, last event kind was {}",
        live.len(),
        EventKind::Deleted
    );

    alice_p2p.disable();
    bob_p2p.disable();
    Ok(())
}

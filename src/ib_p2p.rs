// P2P replication stub.
//
// Mirrors local token events to connected peers over a host-provided
// transport, and surfaces inbound peer events to the host WITHOUT merging
// them into the local store. Peer-sourced writes are never applied
// silently: no conflict-resolution or authority model exists, so the host
// decides whether and how to reconcile.
//
// The library is transport-agnostic the same way the core is
// host-driven: real signaling and ICE negotiation live behind the
// `SignalingChannel`/`PeerTransport` seams, and externally-driven
// callbacks arrive as host calls to `handle_transport_state` and
// `handle_peer_message`. No timeouts are defined for negotiation; a peer
// that never reports `Connected` simply degrades to "no replication".

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rand::Rng;

use crate::ib_config::P2pConfig;
use crate::ib_emitter::{EventEmitter, Subscription};
use crate::ib_interface::{
    EventKind, LedgerError, PeerId, PeerMessage, Token, TokenEvent,
};

// ============================================================================
// Transport seams
// ============================================================================

/// Out-of-band connection-metadata channel to the signaling service.
pub trait SignalingChannel {
    fn open(&mut self) -> Result<(), LedgerError>;

    /// Must not fail on an already-closed channel.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Relay a payload (e.g. a local session description) to the service.
    fn send(&mut self, payload: &str) -> Result<(), LedgerError>;
}

/// Direct transport to one peer, with a message-oriented data channel.
pub trait PeerTransport {
    /// Produce the local session description for negotiation.
    fn create_offer(&mut self) -> Result<String, LedgerError>;

    /// Request a reliable, ordered data channel on this transport.
    fn open_data_channel(&mut self) -> Result<(), LedgerError>;

    /// Whether the data channel is currently open for sending.
    fn channel_open(&self) -> bool;

    /// Send one UTF-8 message over the data channel.
    fn send(&mut self, payload: &str) -> Result<(), LedgerError>;

    /// Must be safe at any point in the lifecycle, including
    /// mid-negotiation and after a previous close.
    fn close(&mut self);
}

/// Host-side factory producing the transport handles.
///
/// Handles end up captured by emitter subscriptions, hence `'static`.
pub trait TransportFactory {
    type Signaling: SignalingChannel + 'static;
    type Transport: PeerTransport + 'static;

    fn open_signaling(&mut self) -> Result<Self::Signaling, LedgerError>;

    fn connect(&mut self, peer: &PeerId) -> Result<Self::Transport, LedgerError>;
}

/// Connection-state report from the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Failed,
}

// ============================================================================
// Peer session state machine
// ============================================================================

/// Lifecycle state of one peer session.
///
/// `Connecting -> Connected` is driven exclusively by the transport's
/// state report via `handle_transport_state`; the component never sets
/// `Connected` optimistically. `Disconnected`/`Failed` reports remove the
/// session from the registry entirely (no dangling rows for dead peers).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionState {
    Connecting { since: DateTime<Utc> },
    Connected { since: DateTime<Utc> },
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }
}

struct PeerSession<T: PeerTransport> {
    state: SessionState,
    transport: T,
}

// ============================================================================
// Host notification sink
// ============================================================================

/// Events the P2P layer surfaces to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum P2pEvent {
    /// A token event received from a peer. Deliberately NOT applied to
    /// the local store; the host decides whether to reconcile.
    RemoteTokenEvent {
        from: PeerId,
        event: EventKind,
        token: Token,
        timestamp: DateTime<Utc>,
    },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    SignalingOpened,
    SignalingClosed,
}

/// Consumer of surfaced P2P events.
pub trait P2pEventSink {
    fn notify(&mut self, event: P2pEvent);
}

/// No-op sink for hosts that ignore P2P notifications.
pub struct NoOpSink;

impl P2pEventSink for NoOpSink {
    #[inline(always)]
    fn notify(&mut self, _event: P2pEvent) {}
}

// ============================================================================
// P2pSync
// ============================================================================

struct P2pInner<F: TransportFactory> {
    local_id: PeerId,
    factory: F,
    signaling: Option<F::Signaling>,
    peers: IndexMap<PeerId, PeerSession<F::Transport>>,
    sink: Box<dyn P2pEventSink>,
}

/// Optional replication component: subscribes to the local event emitter
/// and fans each token event out to connected peers, and surfaces inbound
/// peer traffic to the host.
pub struct P2pSync<F: TransportFactory> {
    inner: Rc<RefCell<P2pInner<F>>>,
    emitter: Rc<EventEmitter>,
    config: P2pConfig,
    subs: Vec<Subscription>,
}

impl<F: TransportFactory + 'static> P2pSync<F> {
    pub fn new(factory: F, emitter: Rc<EventEmitter>, config: P2pConfig) -> Self {
        Self::with_sink(factory, emitter, config, Box::new(NoOpSink))
    }

    pub fn with_sink(
        factory: F,
        emitter: Rc<EventEmitter>,
        config: P2pConfig,
        sink: Box<dyn P2pEventSink>,
    ) -> Self {
        let local_id = config
            .peer_id
            .clone()
            .unwrap_or_else(|| format!("peer_{:08x}", rand::thread_rng().gen::<u32>()));

        Self {
            inner: Rc::new(RefCell::new(P2pInner {
                local_id,
                factory,
                signaling: None,
                peers: IndexMap::new(),
                sink,
            })),
            emitter,
            config,
            subs: Vec::new(),
        }
    }

    /// Session id used as the `from` field of outgoing wire messages.
    pub fn local_peer_id(&self) -> PeerId {
        self.inner.borrow().local_id.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.borrow().signaling.is_some()
    }

    /// Open the signaling connection and, when `auto_sync` is configured,
    /// subscribe to token events for broadcast. Idempotent: enabling an
    /// already-enabled instance is a no-op returning success.
    pub fn enable(&mut self) -> Result<(), LedgerError> {
        if self.is_enabled() {
            return Ok(());
        }

        {
            let mut inner = self.inner.borrow_mut();
            let mut signaling = inner.factory.open_signaling()?;
            signaling.open()?;
            inner.signaling = Some(signaling);
            log::info!("p2p enabled as {}", inner.local_id);
            inner.sink.notify(P2pEvent::SignalingOpened);
        }

        if self.config.auto_sync && self.subs.is_empty() {
            for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
                let inner = Rc::downgrade(&self.inner);
                self.subs.push(self.emitter.on(
                    kind,
                    Box::new(move |event| {
                        if let Some(inner) = inner.upgrade() {
                            inner.borrow_mut().broadcast(event);
                        }
                        Ok(())
                    }),
                ));
            }
        }
        Ok(())
    }

    /// Close every peer connection and the signaling connection, leaving
    /// the registry empty. Each dropped peer is reported through the sink
    /// before the signaling teardown. Idempotent, and safe at any point
    /// in any peer's lifecycle (including mid-negotiation).
    pub fn disable(&mut self) {
        for sub in self.subs.drain(..) {
            sub.cancel();
        }

        let mut inner = self.inner.borrow_mut();
        for (peer_id, mut session) in inner.peers.drain(..).collect::<Vec<_>>() {
            session.transport.close();
            log::debug!("closed peer connection {peer_id}");
            inner.sink.notify(P2pEvent::PeerDisconnected(peer_id));
        }
        if let Some(mut signaling) = inner.signaling.take() {
            signaling.close();
            log::info!("p2p disabled");
            inner.sink.notify(P2pEvent::SignalingClosed);
        }
    }

    /// Open a transport towards `peer_id`: create the transport, request
    /// a data channel, produce the local session description (relayed
    /// over signaling when open) and register the session as connecting.
    ///
    /// Returns whether setup succeeded. Connecting to an already
    /// registered peer is a no-op returning `true`.
    pub fn connect_to_peer(&mut self, peer_id: &PeerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.peers.contains_key(peer_id) {
            return true;
        }

        match inner.open_session(peer_id) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("connect to {peer_id} failed: {e}");
                false
            }
        }
    }

    /// Close and deregister one peer. Absent peers and already-closed
    /// transports are no-ops.
    pub fn close_peer_connection(&mut self, peer_id: &PeerId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(mut session) = inner.peers.shift_remove(peer_id) {
            session.transport.close();
            log::debug!("closed peer connection {peer_id}");
            inner.sink.notify(P2pEvent::PeerDisconnected(peer_id.clone()));
        }
    }

    /// Host entry point for transport connection-state callbacks.
    pub fn handle_transport_state(&mut self, peer_id: &PeerId, state: TransportState) {
        let mut inner = self.inner.borrow_mut();
        match state {
            TransportState::Connected => {
                let newly_connected = match inner.peers.get_mut(peer_id) {
                    Some(session) if !session.state.is_connected() => {
                        session.state = SessionState::Connected { since: Utc::now() };
                        true
                    }
                    Some(_) => false,
                    None => {
                        log::debug!("state report for unknown peer {peer_id}, ignored");
                        false
                    }
                };
                if newly_connected {
                    log::info!("peer {peer_id} connected");
                    inner.sink.notify(P2pEvent::PeerConnected(peer_id.clone()));
                }
            }
            TransportState::Disconnected | TransportState::Failed => {
                if let Some(mut session) = inner.peers.shift_remove(peer_id) {
                    session.transport.close();
                    log::info!("peer {peer_id} disconnected");
                    inner.sink.notify(P2pEvent::PeerDisconnected(peer_id.clone()));
                }
            }
        }
    }

    /// Host entry point for inbound data-channel messages.
    ///
    /// Parses the payload as a wire message and surfaces token events to
    /// the sink. Malformed input is logged and dropped, never fatal, and
    /// nothing here ever writes to the local token store.
    pub fn handle_peer_message(&mut self, from: &PeerId, raw: &str) {
        let message: PeerMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                let err = LedgerError::Parse(e.to_string());
                log::warn!("dropping malformed message from {from}: {err}");
                return;
            }
        };

        let mut inner = self.inner.borrow_mut();
        match message {
            PeerMessage::TokenEvent {
                event,
                token,
                timestamp,
                from: origin,
            } => {
                log::debug!("remote {event} event for {} from {origin}", token.id);
                inner.sink.notify(P2pEvent::RemoteTokenEvent {
                    from: origin,
                    event,
                    token,
                    timestamp,
                });
            }
        }
    }

    /// Serialize `event` and send it to every connected peer whose data
    /// channel is open. Fire-and-forget per peer: closed channels are
    /// skipped and send failures are logged, never raised, so one bad
    /// peer cannot block the rest of the broadcast.
    ///
    /// Called automatically from the emitter subscription when
    /// `auto_sync` is on; exposed for hosts that broadcast manually.
    pub fn broadcast(&mut self, event: &TokenEvent) {
        self.inner.borrow_mut().broadcast(event);
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.borrow().peers.keys().cloned().collect()
    }

    pub fn session_state(&self, peer_id: &PeerId) -> Option<SessionState> {
        self.inner.borrow().peers.get(peer_id).map(|s| s.state)
    }

    pub fn connected_peer_count(&self) -> usize {
        self.inner
            .borrow()
            .peers
            .values()
            .filter(|s| s.state.is_connected())
            .count()
    }
}

impl<F: TransportFactory> P2pInner<F> {
    fn open_session(&mut self, peer_id: &PeerId) -> Result<(), LedgerError> {
        let mut transport = self.factory.connect(peer_id)?;
        transport.open_data_channel()?;
        let offer = transport.create_offer()?;

        // Best effort: the offer relay failing does not tear the session
        // down, the peer just stays in Connecting until the host retries.
        if let Some(signaling) = self.signaling.as_mut() {
            if signaling.is_open() {
                if let Err(e) = signaling.send(&offer) {
                    log::warn!("offer relay to {peer_id} failed: {e}");
                }
            }
        }

        self.peers.insert(
            peer_id.clone(),
            PeerSession {
                state: SessionState::Connecting { since: Utc::now() },
                transport,
            },
        );
        log::debug!("peer {peer_id} connecting");
        Ok(())
    }

    fn broadcast(&mut self, event: &TokenEvent) {
        if self.peers.is_empty() {
            return;
        }

        let message = PeerMessage::TokenEvent {
            event: event.kind,
            token: event.token.clone(),
            timestamp: Utc::now(),
            from: self.local_id.clone(),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("cannot serialize {} event: {e}", event.kind);
                return;
            }
        };

        for (peer_id, session) in self.peers.iter_mut() {
            if !session.state.is_connected() {
                continue;
            }
            if !session.transport.channel_open() {
                log::debug!("skipping {peer_id}: data channel not open");
                continue;
            }
            if let Err(e) = session.transport.send(&payload) {
                log::warn!("send to {peer_id} failed: {e}");
            }
        }
    }
}

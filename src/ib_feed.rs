// Wallet-side feed subscriber.
//
// A presentation-layer consumer: mirrors token events into a bounded,
// human-readable activity log and raises a dirty flag so the host knows
// to re-fetch the store snapshot and stats. Not durable state.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::ib_emitter::{EventEmitter, Subscription};
use crate::ib_interface::{EventKind, TokenEvent};

/// Default number of feed entries kept before the oldest are evicted.
pub const DEFAULT_FEED_CAPACITY: usize = 50;

/// Denormalized, human-readable projection of a token event.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub id: u64,
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

struct FeedInner {
    entries: VecDeque<FeedEvent>,
    capacity: usize,
    next_id: u64,
    dirty: bool,
}

impl FeedInner {
    fn record(&mut self, event: &TokenEvent) {
        let token = &event.token;
        let message = match event.kind {
            EventKind::Created => {
                format!("Minted {} {} ({})", token.amount, token.symbol, token.name)
            }
            EventKind::Updated => {
                format!("Updated {} ({})", token.name, token.id)
            }
            EventKind::Deleted => {
                format!("Burned {} {} ({})", token.amount, token.symbol, token.name)
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(FeedEvent {
            id,
            kind: event.kind,
            message,
            timestamp: Utc::now(),
        });
        // Oldest entries evicted first
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.dirty = true;
    }
}

/// Bounded activity feed fed by emitter subscriptions.
pub struct WalletFeed {
    inner: Rc<RefCell<FeedInner>>,
    subs: Vec<Subscription>,
}

impl WalletFeed {
    /// Subscribe to all three event kinds on `emitter`, keeping at most
    /// `capacity` entries.
    pub fn attach(emitter: &Rc<EventEmitter>, capacity: usize) -> Self {
        let inner = Rc::new(RefCell::new(FeedInner {
            entries: VecDeque::new(),
            capacity,
            next_id: 1,
            dirty: false,
        }));

        let mut subs = Vec::new();
        for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
            let inner = Rc::downgrade(&inner);
            subs.push(emitter.on(
                kind,
                Box::new(move |event| {
                    if let Some(inner) = inner.upgrade() {
                        inner.borrow_mut().record(event);
                    }
                    Ok(())
                }),
            ));
        }

        Self { inner, subs }
    }

    /// Current entries, oldest first.
    pub fn entries(&self) -> Vec<FeedEvent> {
        self.inner.borrow().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// True once per batch of new entries; the host re-fetches store and
    /// stats when this reports true.
    pub fn take_dirty(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        std::mem::replace(&mut inner.dirty, false)
    }

    /// Cancel the emitter subscriptions; the feed stops receiving events.
    pub fn detach(&mut self) {
        for sub in self.subs.drain(..) {
            sub.cancel();
        }
    }
}

// Synchronous pub/sub fan-out between the token store and its subscribers.
//
// Single-threaded by design: emission runs to completion on the calling
// turn, in registration order, before the mutating store call returns.

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::rc::{Rc, Weak};

use crate::ib_interface::{EventKind, TokenEvent};

/// Handler invoked for each matching emission.
///
/// Returning `Err` marks the handler as failed for that emission; the
/// failure is logged and later handlers still run.
pub type EventHandler = Box<dyn FnMut(&TokenEvent) -> Result<(), Box<dyn Error>>>;

struct HandlerSlot {
    id: u64,
    kind: EventKind,
    // Taken out of the slot while the handler is being called, so a
    // reentrant emit never calls the same handler twice in one turn.
    handler: Option<EventHandler>,
}

/// In-process event fan-out.
///
/// Shared as `Rc<EventEmitter>`; the store holds one handle, every
/// subscriber another. There is no queue and no delivery guarantee beyond
/// "handlers registered at emission time are called once per emission".
///
/// Reentrancy semantics (fixed, documented): the handler set is
/// snapshotted when `emit` starts. Handlers registered during an emission
/// do NOT observe that emission; handlers cancelled during an emission are
/// skipped if they have not run yet.
pub struct EventEmitter {
    slots: RefCell<Vec<HandlerSlot>>,
    next_id: Cell<u64>,
}

impl EventEmitter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        })
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The returned [`Subscription`] is the capability to remove exactly
    /// this registration. Dropping it does not unsubscribe; cancelling
    /// twice is a no-op.
    pub fn on(self: &Rc<Self>, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.slots.borrow_mut().push(HandlerSlot {
            id,
            kind,
            handler: Some(handler),
        });

        Subscription {
            emitter: Rc::downgrade(self),
            id,
        }
    }

    /// Invoke all handlers registered for `event.kind`, in registration
    /// order, synchronously. A failing handler is logged and skipped; it
    /// never prevents the remaining handlers from running.
    pub fn emit(&self, event: &TokenEvent) {
        // Snapshot ids up front: registrations made by a handler are not
        // part of this emission.
        let ids: Vec<u64> = self
            .slots
            .borrow()
            .iter()
            .filter(|slot| slot.kind == event.kind)
            .map(|slot| slot.id)
            .collect();

        for id in ids {
            // Take the handler out so the slot table is not borrowed
            // while user code runs (handlers may subscribe/cancel).
            let taken = self
                .slots
                .borrow_mut()
                .iter_mut()
                .find(|slot| slot.id == id)
                .and_then(|slot| slot.handler.take());

            let Some(mut handler) = taken else {
                // Cancelled (or running reentrantly) since the snapshot.
                continue;
            };

            if let Err(e) = handler(event) {
                log::warn!("event handler {id} failed on {} event: {e}", event.kind);
            }

            // Put it back unless the slot was cancelled while running.
            let mut slots = self.slots.borrow_mut();
            if let Some(slot) = slots.iter_mut().find(|slot| slot.id == id) {
                slot.handler = Some(handler);
            }
        }
    }

    /// Number of live registrations for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|slot| slot.kind == kind)
            .count()
    }

    fn remove(&self, id: u64) {
        self.slots.borrow_mut().retain(|slot| slot.id != id);
    }
}

/// Capability to remove one handler registration.
pub struct Subscription {
    emitter: Weak<EventEmitter>,
    id: u64,
}

impl Subscription {
    /// Remove the registration. Calling this more than once, or after the
    /// emitter has been dropped, is a no-op.
    pub fn cancel(&self) {
        if let Some(emitter) = self.emitter.upgrade() {
            emitter.remove(self.id);
        }
    }
}

// Authoritative CRUD over token records.
//
// The store is the sole writer of persisted token state. Every successful
// mutation persists first, then performs exactly one synchronous emission
// before control returns to the caller. A failed persist rolls the
// in-memory change back, so an `Err` leaves the table untouched.

use std::rc::Rc;

use hashbrown::HashSet;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ib_emitter::EventEmitter;
use crate::ib_interface::{
    EventKind, LedgerError, StateBackend, Token, TokenDraft, TokenEvent, TokenId, TokenPatch,
};

/// Backend key holding the JSON array of live token records.
pub const TOKENS_KEY: &str = "infinity-tokens";

/// Backend key holding the JSON array of every id ever issued. Ids in this
/// set are never reissued, even after the token is deleted.
pub const RETIRED_IDS_KEY: &str = "infinity-tokens.retired";

/// Authoritative table of token records.
///
/// Insertion order is preserved: `get_all` returns records in the order
/// they were created unless the caller sorts.
pub struct TokenStore<B: StateBackend> {
    backend: B,
    emitter: Rc<EventEmitter>,
    tokens: IndexMap<TokenId, Token>,
    retired: HashSet<TokenId>,
    rng: StdRng,
}

impl<B: StateBackend> TokenStore<B> {
    /// Open a store over `backend`, loading any persisted tokens and the
    /// retired-id set. Absent keys load as empty; older shapes with
    /// missing optional fields load with defaults.
    pub fn open(backend: B, emitter: Rc<EventEmitter>) -> Result<Self, LedgerError> {
        Self::open_with_rng(backend, emitter, StdRng::from_entropy())
    }

    /// Open with a caller-supplied RNG for deterministic id assignment.
    pub fn open_with_rng(
        backend: B,
        emitter: Rc<EventEmitter>,
        rng: StdRng,
    ) -> Result<Self, LedgerError> {
        let mut tokens = IndexMap::new();
        if let Some(raw) = backend.read(TOKENS_KEY)? {
            let records: Vec<Token> = serde_json::from_str(&raw)
                .map_err(|e| LedgerError::Parse(format!("{TOKENS_KEY}: {e}")))?;
            for record in records {
                tokens.insert(record.id.clone(), record);
            }
        }

        let mut retired: HashSet<TokenId> = HashSet::new();
        if let Some(raw) = backend.read(RETIRED_IDS_KEY)? {
            let ids: Vec<TokenId> = serde_json::from_str(&raw)
                .map_err(|e| LedgerError::Parse(format!("{RETIRED_IDS_KEY}: {e}")))?;
            retired.extend(ids);
        }
        // Live ids count as issued even if the retired set was lost
        retired.extend(tokens.keys().cloned());

        log::debug!(
            "token store opened: {} live tokens, {} issued ids",
            tokens.len(),
            retired.len()
        );

        Ok(Self {
            backend,
            emitter,
            tokens,
            retired,
            rng,
        })
    }

    /// Create a token from `draft`, assigning a fresh unique id and
    /// creation timestamp. Emits one `created` event with the full record
    /// before returning.
    pub fn create(&mut self, draft: TokenDraft) -> Result<Token, LedgerError> {
        validate_quantity("amount", draft.amount)?;
        validate_quantity("value", draft.value)?;

        let id = self.fresh_id();
        let token = Token {
            id: id.clone(),
            name: draft.name,
            symbol: draft.symbol,
            currency: draft.currency,
            amount: draft.amount,
            value: draft.value,
            source: draft.source,
            metadata: draft.metadata,
            created_at: chrono::Utc::now(),
        };

        self.tokens.insert(id, token.clone());
        if let Err(e) = self.persist() {
            self.tokens.shift_remove(&token.id);
            return Err(e);
        }

        log::debug!("created token {} ({})", token.id, token.symbol);
        self.emitter.emit(&TokenEvent {
            kind: EventKind::Created,
            token: token.clone(),
        });
        Ok(token)
    }

    /// Merge `patch` into the record for `id`. Emits one `updated` event
    /// with the post-merge record. Fails with `NotFound` (and emits
    /// nothing) if the id is absent; an unknown id reports `NotFound`
    /// even when the patch itself is invalid.
    pub fn update(&mut self, id: &str, patch: TokenPatch) -> Result<Token, LedgerError> {
        if !self.tokens.contains_key(id) {
            return Err(LedgerError::NotFound(id.to_string()));
        }
        if let Some(amount) = patch.amount {
            validate_quantity("amount", amount)?;
        }
        if let Some(value) = patch.value {
            validate_quantity("value", value)?;
        }

        let (previous, token) = {
            let record = self
                .tokens
                .get_mut(id)
                .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
            let previous = record.clone();

            if let Some(name) = patch.name {
                record.name = name;
            }
            if let Some(symbol) = patch.symbol {
                record.symbol = symbol;
            }
            if let Some(currency) = patch.currency {
                record.currency = currency;
            }
            if let Some(amount) = patch.amount {
                record.amount = amount;
            }
            if let Some(value) = patch.value {
                record.value = value;
            }
            if let Some(source) = patch.source {
                record.source = Some(source);
            }
            if let Some(metadata) = patch.metadata {
                record.metadata = metadata;
            }
            (previous, record.clone())
        };

        if let Err(e) = self.persist() {
            if let Some(record) = self.tokens.get_mut(id) {
                *record = previous;
            }
            return Err(e);
        }

        log::debug!("updated token {}", token.id);
        self.emitter.emit(&TokenEvent {
            kind: EventKind::Updated,
            token: token.clone(),
        });
        Ok(token)
    }

    /// Remove the record for `id`. Emits one `deleted` event carrying the
    /// pre-deletion record. Fails with `NotFound` (and emits nothing) if
    /// the id is absent. The id is never reissued.
    pub fn delete(&mut self, id: &str) -> Result<Token, LedgerError> {
        let index = self
            .tokens
            .get_index_of(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        // shift_remove keeps the remaining records in insertion order
        let (key, token) = self
            .tokens
            .shift_remove_index(index)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if let Err(e) = self.persist() {
            // Back into its original slot, keeping insertion order intact
            self.tokens.shift_insert(index, key, token);
            return Err(e);
        }

        log::debug!("deleted token {}", token.id);
        self.emitter.emit(&TokenEvent {
            kind: EventKind::Deleted,
            token: token.clone(),
        });
        Ok(token)
    }

    /// Look up a single record.
    pub fn get(&self, id: &str) -> Option<&Token> {
        self.tokens.get(id)
    }

    /// Snapshot of all current records, in insertion order.
    pub fn get_all(&self) -> Vec<Token> {
        self.tokens.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Handle to the emitter this store notifies.
    pub fn emitter(&self) -> &Rc<EventEmitter> {
        &self.emitter
    }

    fn fresh_id(&mut self) -> TokenId {
        loop {
            let candidate = format!("tok_{:016x}", self.rng.gen::<u64>());
            // insert() is false if the id was ever issued before
            if self.retired.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn persist(&mut self) -> Result<(), LedgerError> {
        let records: Vec<&Token> = self.tokens.values().collect();
        let raw = serde_json::to_string(&records)
            .map_err(|e| LedgerError::Parse(format!("{TOKENS_KEY}: {e}")))?;
        self.backend.write(TOKENS_KEY, &raw)?;

        let mut issued: Vec<&TokenId> = self.retired.iter().collect();
        issued.sort();
        let raw = serde_json::to_string(&issued)
            .map_err(|e| LedgerError::Parse(format!("{RETIRED_IDS_KEY}: {e}")))?;
        self.backend.write(RETIRED_IDS_KEY, &raw)
    }

    /// Consume the store, returning the backend (for reload tests and
    /// host-driven shutdown).
    pub fn into_backend(self) -> B {
        self.backend
    }
}

fn validate_quantity(field: &str, quantity: f64) -> Result<(), LedgerError> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(LedgerError::Validation(format!(
            "{field} must be a finite non-negative number, got {quantity}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ib_interface::Currency;
    use std::cell::RefCell;

    use crate::ib_memory_backend::MemoryBackend;

    fn seeded_store<B: StateBackend>(backend: B) -> (TokenStore<B>, Rc<EventEmitter>) {
        let emitter = EventEmitter::new();
        let store =
            TokenStore::open_with_rng(backend, emitter.clone(), StdRng::seed_from_u64(7)).unwrap();
        (store, emitter)
    }

    /// Backend whose writes can be switched off mid-test to exercise the
    /// persist error path.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: Rc<std::cell::Cell<bool>>,
    }

    impl FlakyBackend {
        fn new() -> (Self, Rc<std::cell::Cell<bool>>) {
            let fail_writes = Rc::new(std::cell::Cell::new(false));
            let backend = Self {
                inner: MemoryBackend::new(),
                fail_writes: fail_writes.clone(),
            };
            (backend, fail_writes)
        }
    }

    impl StateBackend for FlakyBackend {
        fn read(&self, key: &str) -> Result<Option<String>, LedgerError> {
            self.inner.read(key)
        }

        fn write(&mut self, key: &str, value: &str) -> Result<(), LedgerError> {
            if self.fail_writes.get() {
                return Err(LedgerError::Transport("backend offline".into()));
            }
            self.inner.write(key, value)
        }

        fn delete(&mut self, key: &str) -> Result<(), LedgerError> {
            self.inner.delete(key)
        }
    }

    fn draft(name: &str, currency: Currency, amount: f64, value: f64) -> TokenDraft {
        TokenDraft {
            name: name.into(),
            symbol: name.chars().take(3).collect::<String>().to_uppercase(),
            currency,
            amount,
            value,
            ..TokenDraft::default()
        }
    }

    #[test]
    fn test_create_then_get_all() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());

        let token = store
            .create(draft("Infinity Credit", Currency::Infinity, 100.0, 50.0))
            .unwrap();

        assert!(token.id.starts_with("tok_"));
        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], token);
        assert_eq!(all[0].amount, 100.0);
        assert_eq!(all[0].value, 50.0);
    }

    #[test]
    fn test_create_assigns_unique_ids() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());

        let mut ids = std::collections::BTreeSet::new();
        for i in 0..100 {
            let token = store
                .create(draft(&format!("T{i}"), Currency::Research, 1.0, 1.0))
                .unwrap();
            assert!(ids.insert(token.id));
        }
    }

    #[test]
    fn test_create_rejects_bad_quantities() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());

        for (amount, value) in [
            (-1.0, 1.0),
            (1.0, -0.5),
            (f64::NAN, 1.0),
            (1.0, f64::INFINITY),
        ] {
            let err = store
                .create(draft("Bad", Currency::Art, amount, value))
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_merges_patch() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());
        let token = store
            .create(draft("Study Token", Currency::Research, 10.0, 5.0))
            .unwrap();

        let updated = store
            .update(
                &token.id,
                TokenPatch {
                    amount: Some(25.0),
                    source: Some("grant".into()),
                    ..TokenPatch::default()
                },
            )
            .unwrap();

        assert_eq!(updated.amount, 25.0);
        assert_eq!(updated.source.as_deref(), Some("grant"));
        // Untouched fields survive the merge
        assert_eq!(updated.name, "Study Token");
        assert_eq!(updated.value, 5.0);
        assert_eq!(updated.created_at, token.created_at);
        assert_eq!(store.get(&token.id), Some(&updated));
    }

    #[test]
    fn test_update_unknown_id_fails_without_event() {
        let (mut store, emitter) = seeded_store(MemoryBackend::new());
        let events = Rc::new(RefCell::new(Vec::new()));

        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Updated,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        let err = store
            .update("tok_missing", TokenPatch::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(id) if id == "tok_missing"));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_delete_unknown_id_fails_without_event() {
        let (mut store, emitter) = seeded_store(MemoryBackend::new());
        store
            .create(draft("Keep", Currency::Music, 1.0, 1.0))
            .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Deleted,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        let err = store.delete("tok_missing").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(store.len(), 1);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_delete_emits_pre_deletion_record() {
        let (mut store, emitter) = seeded_store(MemoryBackend::new());
        let token = store
            .create(draft("Ephemeral", Currency::Art, 2.0, 3.0))
            .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Deleted,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        let removed = store.delete(&token.id).unwrap();
        assert_eq!(removed, token);
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(events.borrow()[0].token, token);
        assert!(store.is_empty());
    }

    #[test]
    fn test_events_observed_in_operation_order() {
        let (mut store, emitter) = seeded_store(MemoryBackend::new());
        let observed = Rc::new(RefCell::new(Vec::new()));

        let mut subs = Vec::new();
        for kind in [EventKind::Created, EventKind::Updated, EventKind::Deleted] {
            let observed = observed.clone();
            subs.push(emitter.on(
                kind,
                Box::new(move |ev| {
                    observed.borrow_mut().push((ev.kind, ev.token.amount));
                    Ok(())
                }),
            ));
        }

        let token = store
            .create(draft("Lifecycle", Currency::Infinity, 1.0, 1.0))
            .unwrap();
        store
            .update(
                &token.id,
                TokenPatch {
                    amount: Some(2.0),
                    ..TokenPatch::default()
                },
            )
            .unwrap();
        store
            .update(
                &token.id,
                TokenPatch {
                    amount: Some(3.0),
                    ..TokenPatch::default()
                },
            )
            .unwrap();
        store.delete(&token.id).unwrap();

        assert_eq!(
            *observed.borrow(),
            vec![
                (EventKind::Created, 1.0),
                (EventKind::Updated, 2.0),
                (EventKind::Updated, 3.0),
                (EventKind::Deleted, 3.0),
            ]
        );
    }

    #[test]
    fn test_event_fires_before_mutation_returns() {
        let (mut store, emitter) = seeded_store(MemoryBackend::new());

        let fired = Rc::new(std::cell::Cell::new(false));
        let flag = fired.clone();
        let _sub = emitter.on(
            EventKind::Created,
            Box::new(move |_| {
                flag.set(true);
                Ok(())
            }),
        );

        store
            .create(draft("Sync", Currency::Music, 1.0, 1.0))
            .unwrap();
        // Callers can rely on "event has fired by the time control returns"
        assert!(fired.get());
    }

    #[test]
    fn test_get_all_preserves_insertion_order_across_delete() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());
        let a = store.create(draft("A", Currency::Art, 1.0, 1.0)).unwrap();
        let b = store.create(draft("B", Currency::Art, 1.0, 1.0)).unwrap();
        let c = store.create(draft("C", Currency::Art, 1.0, 1.0)).unwrap();

        store.delete(&b.id).unwrap();
        let names: Vec<String> = store.get_all().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(store.get(&a.id).unwrap().name, "A");
        assert_eq!(store.get(&c.id).unwrap().name, "C");
    }

    #[test]
    fn test_deleted_id_not_reissued_across_reload() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());
        let token = store
            .create(draft("Once", Currency::Infinity, 1.0, 1.0))
            .unwrap();
        store.delete(&token.id).unwrap();

        // Reopen over the same backend with the same seed: the RNG will
        // propose the same first candidate, which must be skipped.
        let backend = store.into_backend();
        let (mut reopened, _emitter) = seeded_store(backend);
        assert!(reopened.is_empty());

        let fresh = reopened
            .create(draft("Again", Currency::Infinity, 1.0, 1.0))
            .unwrap();
        assert_ne!(fresh.id, token.id);
    }

    #[test]
    fn test_update_unknown_id_reports_not_found_before_validation() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());

        // The bad patch must not shadow the missing id
        let err = store
            .update(
                "tok_missing",
                TokenPatch {
                    amount: Some(-1.0),
                    ..TokenPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(id) if id == "tok_missing"));
    }

    #[test]
    fn test_failed_persist_rolls_back_create() {
        let (backend, fail_writes) = FlakyBackend::new();
        let (mut store, emitter) = seeded_store(backend);

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Created,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        fail_writes.set(true);
        let err = store
            .create(draft("Phantom", Currency::Infinity, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
        assert_eq!(store.len(), 0);
        assert!(store.get_all().is_empty());
        assert!(events.borrow().is_empty());

        // The store stays usable once the backend recovers
        fail_writes.set(false);
        store
            .create(draft("Real", Currency::Infinity, 1.0, 1.0))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_failed_persist_rolls_back_update() {
        let (backend, fail_writes) = FlakyBackend::new();
        let (mut store, emitter) = seeded_store(backend);
        let token = store
            .create(draft("Stable", Currency::Research, 10.0, 5.0))
            .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Updated,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        fail_writes.set(true);
        let err = store
            .update(
                &token.id,
                TokenPatch {
                    amount: Some(99.0),
                    name: Some("Mutated".into()),
                    ..TokenPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
        assert_eq!(store.get(&token.id), Some(&token));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_failed_persist_rolls_back_delete_preserving_order() {
        let (backend, fail_writes) = FlakyBackend::new();
        let (mut store, emitter) = seeded_store(backend);
        store.create(draft("A", Currency::Art, 1.0, 1.0)).unwrap();
        let b = store.create(draft("B", Currency::Art, 1.0, 1.0)).unwrap();
        store.create(draft("C", Currency::Art, 1.0, 1.0)).unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        let _sub = emitter.on(
            EventKind::Deleted,
            Box::new(move |ev| {
                seen.borrow_mut().push(ev.clone());
                Ok(())
            }),
        );

        fail_writes.set(true);
        let err = store.delete(&b.id).unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
        assert!(events.borrow().is_empty());

        // The record is back in its original slot
        let names: Vec<String> = store.get_all().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        fail_writes.set(false);
        store.delete(&b.id).unwrap();
        let names: Vec<String> = store.get_all().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_persisted_state_survives_reload() {
        let (mut store, _emitter) = seeded_store(MemoryBackend::new());
        store
            .create(draft("Durable", Currency::Research, 4.0, 8.0))
            .unwrap();
        let expected = store.get_all();

        let backend = store.into_backend();
        let (reopened, _emitter) = seeded_store(backend);
        assert_eq!(reopened.get_all(), expected);
    }
}

// Point-in-time summary over the token store.
//
// Recomputed from a fresh snapshot on every call. No caching and no
// incremental maintenance: at personal-wallet scale, correctness by
// recomputation beats cache invalidation.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ib_interface::{Currency, StateBackend};
use crate::ib_store::TokenStore;

/// Summary counts and value total over the current token set.
///
/// `by_type` always carries all four currencies, zero counts included,
/// so consumers can bind to a stable shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub by_type: BTreeMap<Currency, usize>,
    pub total_value: f64,
}

impl LedgerStats {
    /// Compute stats from a fresh store snapshot.
    pub fn compute<B: StateBackend>(store: &TokenStore<B>) -> Self {
        let mut by_type: BTreeMap<Currency, usize> = BTreeMap::new();
        for currency in Currency::ALL {
            by_type.insert(currency, 0);
        }

        let snapshot = store.get_all();
        let mut total_value = 0.0;
        for token in &snapshot {
            *by_type.entry(token.currency).or_insert(0) += 1;
            total_value += token.value;
        }

        Self {
            total: snapshot.len(),
            by_type,
            total_value,
        }
    }

    /// Count for one currency bucket.
    pub fn count(&self, currency: Currency) -> usize {
        self.by_type.get(&currency).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ib_emitter::EventEmitter;
    use crate::ib_interface::{TokenDraft, TokenPatch};
    use crate::ib_memory_backend::MemoryBackend;

    fn store() -> TokenStore<MemoryBackend> {
        TokenStore::open(MemoryBackend::new(), EventEmitter::new()).unwrap()
    }

    fn draft(currency: Currency, value: f64) -> TokenDraft {
        TokenDraft {
            name: "T".into(),
            symbol: "T".into(),
            currency,
            amount: 1.0,
            value,
            ..TokenDraft::default()
        }
    }

    #[test]
    fn test_empty_store_has_stable_shape() {
        let stats = LedgerStats::compute(&store());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.total_value, 0.0);
        // All four buckets present even at zero
        assert_eq!(stats.by_type.len(), 4);
        for currency in Currency::ALL {
            assert_eq!(stats.count(currency), 0);
        }
    }

    #[test]
    fn test_scenario_single_infinity_credit() {
        let mut store = store();
        store
            .create(TokenDraft {
                name: "Infinity Credit".into(),
                symbol: "INF".into(),
                currency: "infinity_tokens".parse().unwrap(),
                amount: 100.0,
                value: 50.0,
                ..TokenDraft::default()
            })
            .unwrap();

        let stats = LedgerStats::compute(&store);
        assert_eq!(stats.count(Currency::Infinity), 1);
        assert_eq!(stats.total_value, 50.0);
    }

    #[test]
    fn test_totals_track_mutations() {
        let mut store = store();
        let a = store.create(draft(Currency::Infinity, 10.0)).unwrap();
        let b = store.create(draft(Currency::Infinity, 20.0)).unwrap();
        store.create(draft(Currency::Art, 5.0)).unwrap();

        let stats = LedgerStats::compute(&store);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total, store.get_all().len());
        assert_eq!(stats.by_type.values().sum::<usize>(), stats.total);
        assert_eq!(stats.count(Currency::Infinity), 2);
        assert_eq!(stats.count(Currency::Art), 1);
        assert_eq!(stats.total_value, 35.0);

        store.delete(&a.id).unwrap();
        store
            .update(
                &b.id,
                TokenPatch {
                    value: Some(25.0),
                    currency: Some(Currency::Music),
                    ..TokenPatch::default()
                },
            )
            .unwrap();

        let stats = LedgerStats::compute(&store);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.values().sum::<usize>(), stats.total);
        assert_eq!(stats.count(Currency::Infinity), 0);
        assert_eq!(stats.count(Currency::Music), 1);
        assert_eq!(stats.total_value, 30.0);
    }

    #[test]
    fn test_serialized_shape_uses_wire_names() {
        let stats = LedgerStats::compute(&store());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["by_type"].get("infinity_tokens").is_some());
        assert!(json["by_type"].get("research_tokens").is_some());
        assert!(json["by_type"].get("art_tokens").is_some());
        assert!(json["by_type"].get("music_tokens").is_some());
    }
}

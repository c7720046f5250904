//! The quantum debt economy.
//!
//! Debt is purely local to a peer: it is never published on the Sync
//! Channel. Every mutation is a read-modify-write against the durable slot.

use std::sync::Arc;
use tracing::warn;

use crate::collaborators::Collaborators;
use crate::role::Role;
use crate::store::DebtStore;

pub const DEBT_MAX: f64 = 100.0;
pub const DEBT_MIN: f64 = 0.0;

/// Rounded percentage shown to the player.
pub fn debt_percent(value: f64) -> u32 {
    value.clamp(DEBT_MIN, DEBT_MAX).round() as u32
}

/// Bounded debt value backed by a `DebtStore`.
pub struct DebtLedger {
    store: Arc<dyn DebtStore>,
    collaborators: Collaborators,
}

impl DebtLedger {
    pub fn new(store: Arc<dyn DebtStore>, collaborators: Collaborators) -> Self {
        Self { store, collaborators }
    }

    /// Reads the stored value.
    ///
    /// Missing, unreadable or nonsensical values read as full debt.
    pub fn current(&self) -> f64 {
        match self.store.read_debt() {
            Ok(Some(value)) if value.is_finite() => value.clamp(DEBT_MIN, DEBT_MAX),
            Ok(Some(value)) => {
                warn!(value, "stored debt is not finite, using default");
                DEBT_MAX
            }
            Ok(None) => DEBT_MAX,
            Err(e) => {
                warn!("debt read failed, using default: {}", e);
                DEBT_MAX
            }
        }
    }

    /// Applies `delta`, clamps to [0, 100], persists and notifies.
    pub fn apply(&mut self, delta: f64) -> f64 {
        let current = self.current();
        if !delta.is_finite() {
            warn!(delta, "ignoring non-finite debt delta");
            return current;
        }

        let value = (current + delta).clamp(DEBT_MIN, DEBT_MAX);
        if let Err(e) = self.store.write_debt(value) {
            warn!("debt write failed: {}", e);
        }

        self.collaborators.renderer.debt_opacity_changed(value / DEBT_MAX);
        self.collaborators.display.debt_changed(debt_percent(value));
        value
    }

    /// Decay step. Only Collapsers pay.
    pub fn tick(&mut self, role: Role, amount: f64) -> Option<f64> {
        match role {
            Role::Collapser => Some(self.apply(-amount)),
            Role::Dreamer => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DisplayEvent, RecordingDisplay, RecordingRenderer, RenderEvent};
    use crate::error::StoreError;
    use crate::store::MemoryDebtStore;
    use proptest::prelude::*;

    struct BrokenStore;

    impl DebtStore for BrokenStore {
        fn read_debt(&self) -> Result<Option<f64>, StoreError> {
            Err(StoreError::Read("disk on fire".into()))
        }

        fn write_debt(&self, _value: f64) -> Result<(), StoreError> {
            Err(StoreError::Write("disk on fire".into()))
        }
    }

    fn ledger_with(store: Arc<dyn DebtStore>) -> (DebtLedger, Arc<RecordingRenderer>, Arc<RecordingDisplay>) {
        let renderer = Arc::new(RecordingRenderer::new());
        let display = Arc::new(RecordingDisplay::new());
        let ledger = DebtLedger::new(store, Collaborators::new(renderer.clone(), display.clone()));
        (ledger, renderer, display)
    }

    #[test]
    fn test_missing_value_defaults_to_full() {
        let (ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::new()));
        assert_eq!(ledger.current(), 100.0);
    }

    #[test]
    fn test_apply_persists_and_notifies() {
        let store = Arc::new(MemoryDebtStore::new());
        let (mut ledger, renderer, display) = ledger_with(store.clone());

        assert_eq!(ledger.apply(-5.0), 95.0);
        assert_eq!(store.read_debt().unwrap(), Some(95.0));
        assert_eq!(renderer.events(), vec![RenderEvent::Opacity(0.95)]);
        assert_eq!(display.events(), vec![DisplayEvent::Debt(95)]);
    }

    #[test]
    fn test_twenty_five_penalties_floor_at_zero() {
        let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::new()));
        let mut last = 100.0;
        for _ in 0..25 {
            last = ledger.apply(-5.0);
        }
        assert_eq!(last, 0.0);
        assert_eq!(ledger.apply(-5.0), 0.0);
    }

    #[test]
    fn test_apply_clamps_upwards() {
        let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::with_value(98.0)));
        assert_eq!(ledger.apply(10.0), 100.0);
    }

    #[test]
    fn test_tick_is_gated_by_role() {
        let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::new()));
        assert_eq!(ledger.tick(Role::Dreamer, 0.1), None);
        assert_eq!(ledger.current(), 100.0);

        let after = ledger.tick(Role::Collapser, 0.1).unwrap();
        assert!((after - 99.9).abs() < 1e-9);
        assert!((ledger.current() - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_tick_at_zero_stays_zero() {
        let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::with_value(0.05)));
        assert_eq!(ledger.tick(Role::Collapser, 0.1), Some(0.0));
    }

    #[test]
    fn test_store_failures_are_not_fatal() {
        let (mut ledger, _, display) = ledger_with(Arc::new(BrokenStore));
        assert_eq!(ledger.current(), 100.0);
        assert_eq!(ledger.apply(-5.0), 95.0);
        assert_eq!(display.events(), vec![DisplayEvent::Debt(95)]);
    }

    #[test]
    fn test_out_of_range_stored_value_is_clamped() {
        let (ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::with_value(250.0)));
        assert_eq!(ledger.current(), 100.0);
        let (ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::with_value(f64::NAN)));
        assert_eq!(ledger.current(), 100.0);
    }

    #[test]
    fn test_non_finite_delta_is_ignored() {
        let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::with_value(50.0)));
        assert_eq!(ledger.apply(f64::NEG_INFINITY), 50.0);
    }

    proptest! {
        #[test]
        fn prop_debt_always_within_bounds(deltas in proptest::collection::vec(-150.0f64..150.0, 1..64)) {
            let (mut ledger, _, _) = ledger_with(Arc::new(MemoryDebtStore::new()));
            for delta in deltas {
                let value = ledger.apply(delta);
                prop_assert!((DEBT_MIN..=DEBT_MAX).contains(&value));
                prop_assert_eq!(value, ledger.current());
            }
        }
    }
}

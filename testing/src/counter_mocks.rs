//! In-memory counter store for fast, deterministic tests.
//!
//! Each operation locks the whole store for its check-and-mutate step, which
//! gives the same per-operation atomicity as the Lua scripts in the Redis store.

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned locks is acceptable

use boxoffice_core::{
    BoxFuture, CheckoutId, CounterError, CounterStore, ReservationMetadata, TierId, TierInventory,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    tiers: BTreeMap<TierId, TierInventory>,
    reservations: HashMap<CheckoutId, ReservationMetadata>,
}

/// In-memory counter store.
///
/// Cloning shares the underlying state, so a test can keep a handle while the
/// service under test owns another.
///
/// # Fault injection
///
/// - [`set_unavailable`](Self::set_unavailable): every call fails with `Backend`
/// - [`fail_releases`](Self::fail_releases): only `release` fails, which drives
///   the compensation and rollback error paths
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
    releases_fail: Arc<AtomicBool>,
    release_calls: Arc<AtomicUsize>,
}

impl InMemoryCounterStore {
    /// Create an empty store with no tiers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given tiers already initialized.
    #[must_use]
    pub fn with_tiers<'a>(tiers: impl IntoIterator<Item = (&'a TierId, u32)>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for (tier, count) in tiers {
                state.tiers.insert(
                    tier.clone(),
                    TierInventory {
                        tier: tier.clone(),
                        total_capacity: count,
                        available: count,
                    },
                );
            }
        }
        store
    }

    /// Make every operation fail with a transient backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `release` fail with a transient backend error.
    pub fn fail_releases(&self, fail: bool) {
        self.releases_fail.store(fail, Ordering::SeqCst);
    }

    /// Current available count, read synchronously.
    #[must_use]
    pub fn available(&self, tier: &TierId) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .tiers
            .get(tier)
            .map(|inv| inv.available)
    }

    /// Number of `release` calls that reached the store, including failed ones.
    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Whether reservation metadata exists for a checkout.
    #[must_use]
    pub fn has_reservation(&self, checkout_id: &CheckoutId) -> bool {
        self.state
            .lock()
            .unwrap()
            .reservations
            .contains_key(checkout_id)
    }

    fn check_available(&self) -> Result<(), CounterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CounterError::Backend("counter store unavailable".to_string()));
        }
        Ok(())
    }

    fn apply_reserve(&self, tier: &TierId, quantity: u32) -> Result<u32, CounterError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let inv = state
            .tiers
            .get_mut(tier)
            .ok_or_else(|| CounterError::UnknownTier(tier.clone()))?;
        if inv.available < quantity {
            return Err(CounterError::InsufficientInventory {
                tier: tier.clone(),
                requested: quantity,
                available: inv.available,
            });
        }
        inv.available -= quantity;
        Ok(inv.available)
    }

    fn apply_release(&self, tier: &TierId, quantity: u32) -> Result<u32, CounterError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.releases_fail.load(Ordering::SeqCst) {
            return Err(CounterError::Backend("release rejected".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let inv = state
            .tiers
            .get_mut(tier)
            .ok_or_else(|| CounterError::UnknownTier(tier.clone()))?;
        inv.available = inv.available.saturating_add(quantity).min(inv.total_capacity);
        Ok(inv.available)
    }

    fn apply_adjust(&self, tier: &TierId, delta: i64) -> Result<u32, CounterError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let inv = state
            .tiers
            .get_mut(tier)
            .ok_or_else(|| CounterError::UnknownTier(tier.clone()))?;
        let shift = |value: u32| -> u32 {
            let shifted = i64::from(value).saturating_add(delta).max(0);
            u32::try_from(shifted).unwrap_or(u32::MAX)
        };
        inv.total_capacity = shift(inv.total_capacity);
        inv.available = shift(inv.available).min(inv.total_capacity);
        Ok(inv.available)
    }
}

impl CounterStore for InMemoryCounterStore {
    fn initialize(&self, tier: &TierId, count: u32) -> BoxFuture<'_, Result<TierInventory, CounterError>> {
        let result = self.check_available().map(|()| {
            let inventory = TierInventory {
                tier: tier.clone(),
                total_capacity: count,
                available: count,
            };
            self.state
                .lock()
                .unwrap()
                .tiers
                .insert(tier.clone(), inventory.clone());
            inventory
        });
        Box::pin(async move { result })
    }

    fn reserve(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>> {
        let result = self.apply_reserve(tier, quantity);
        Box::pin(async move { result })
    }

    fn release(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>> {
        let result = self.apply_release(tier, quantity);
        Box::pin(async move { result })
    }

    fn adjust(&self, tier: &TierId, delta: i64) -> BoxFuture<'_, Result<u32, CounterError>> {
        let result = self.apply_adjust(tier, delta);
        Box::pin(async move { result })
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TierInventory>, CounterError>> {
        let result = self
            .check_available()
            .map(|()| self.state.lock().unwrap().tiers.values().cloned().collect());
        Box::pin(async move { result })
    }

    fn put_reservation(
        &self,
        metadata: &ReservationMetadata,
        _ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CounterError>> {
        let result = self.check_available().map(|()| {
            self.state
                .lock()
                .unwrap()
                .reservations
                .insert(metadata.checkout_id.clone(), metadata.clone());
        });
        Box::pin(async move { result })
    }

    fn get_reservation(
        &self,
        checkout_id: &CheckoutId,
    ) -> BoxFuture<'_, Result<Option<ReservationMetadata>, CounterError>> {
        let result = self.check_available().map(|()| {
            self.state
                .lock()
                .unwrap()
                .reservations
                .get(checkout_id)
                .cloned()
        });
        Box::pin(async move { result })
    }

    fn delete_reservation(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<bool, CounterError>> {
        let result = self.check_available().map(|()| {
            self.state
                .lock()
                .unwrap()
                .reservations
                .remove(checkout_id)
                .is_some()
        });
        Box::pin(async move { result })
    }
}

//! Counter store contract: atomic per-tier availability counters.
//!
//! The counter store is the single source of truth for admission control. Every
//! mutating operation is one atomic step on the backing service; callers never
//! read a value and write it back.
//!
//! # Implementations
//!
//! - `RedisCounterStore` (in `boxoffice-redis`): Lua scripts, production
//! - `InMemoryCounterStore` (in `boxoffice-testing`): mutex-guarded map, tests

use crate::types::{CheckoutId, ReservationMetadata, TierId, TierInventory};
use crate::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during counter store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Not enough tickets left. No counter was modified.
    #[error("Insufficient inventory for tier {tier}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Tier that was requested
        tier: TierId,
        /// Quantity requested
        requested: u32,
        /// Quantity available when the check ran
        available: u32,
    },

    /// Tier was never initialized.
    #[error("Unknown tier: {0}")]
    UnknownTier(TierId),

    /// Backend unreachable or returned an unexpected reply. Safe to retry.
    #[error("Counter store error: {0}")]
    Backend(String),
}

impl CounterError {
    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Atomic per-tier counters plus short-lived reservation metadata.
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so the store can be shared as
/// `Arc<dyn CounterStore>` across request handlers.
pub trait CounterStore: Send + Sync {
    /// Set `available = total = count` for a tier.
    ///
    /// Administrative only: running it during active sales resets any holds.
    ///
    /// # Errors
    ///
    /// - `Backend`: store unavailable
    fn initialize(&self, tier: &TierId, count: u32) -> BoxFuture<'_, Result<TierInventory, CounterError>>;

    /// Atomically check `available >= quantity` and decrement.
    ///
    /// Returns the new available count.
    ///
    /// # Errors
    ///
    /// - `InsufficientInventory`: not enough left; nothing was modified
    /// - `UnknownTier`: tier never initialized
    /// - `Backend`: store unavailable
    fn reserve(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>>;

    /// Atomically increment, clamped so `available` never exceeds total capacity.
    ///
    /// Returns the new available count.
    ///
    /// # Errors
    ///
    /// - `UnknownTier`: tier never initialized
    /// - `Backend`: store unavailable
    fn release(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>>;

    /// Administrative signed capacity adjustment.
    ///
    /// Applies `delta` to both total capacity and availability, flooring each at
    /// zero and keeping `available <= total`. Returns the new available count.
    ///
    /// # Errors
    ///
    /// - `UnknownTier`: tier never initialized
    /// - `Backend`: store unavailable
    fn adjust(&self, tier: &TierId, delta: i64) -> BoxFuture<'_, Result<u32, CounterError>>;

    /// Snapshot of every initialized tier, sorted by tier id.
    ///
    /// Not linearizable with concurrent reservations.
    ///
    /// # Errors
    ///
    /// - `Backend`: store unavailable
    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TierInventory>, CounterError>>;

    /// Store reservation metadata for a pending checkout, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// - `Backend`: store unavailable
    fn put_reservation(
        &self,
        metadata: &ReservationMetadata,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CounterError>>;

    /// Load reservation metadata, if still present.
    ///
    /// # Errors
    ///
    /// - `Backend`: store unavailable or entry unreadable
    fn get_reservation(
        &self,
        checkout_id: &CheckoutId,
    ) -> BoxFuture<'_, Result<Option<ReservationMetadata>, CounterError>>;

    /// Delete reservation metadata. Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// - `Backend`: store unavailable
    fn delete_reservation(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<bool, CounterError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_inventory_display() {
        let error = CounterError::InsufficientInventory {
            tier: TierId::parse("VIP").unwrap(),
            requested: 3,
            available: 2,
        };
        let display = format!("{error}");
        assert!(display.contains("requested 3"));
        assert!(display.contains("available 2"));
        assert!(!error.is_transient());
    }

    #[test]
    fn backend_errors_are_transient() {
        assert!(CounterError::Backend("connection reset".into()).is_transient());
    }
}

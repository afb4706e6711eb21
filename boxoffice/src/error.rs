//! Service-level error taxonomy.
//!
//! Store errors from `boxoffice-core` are folded into [`ReservationError`], which
//! the HTTP layer maps to status codes in `server::error`.

use boxoffice_core::{CheckoutId, CounterError, LedgerError, OrderStatus, TierId};
use thiserror::Error;

/// Errors surfaced by the reservation, rollback, admission, payment and scan services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// Request failed validation before any side effect.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Not enough tickets left in the tier.
    #[error("Tier {tier} sold out: requested {requested}, available {available}")]
    SoldOut {
        /// Requested tier
        tier: TierId,
        /// Quantity requested
        requested: u32,
        /// Quantity available when the check ran
        available: u32,
    },

    /// Tier was never initialized in the counter store.
    #[error("Unknown tier: {0}")]
    UnknownTier(TierId),

    /// Client already holds the maximum number of pending reservations.
    #[error("Too many active holds (limit {limit})")]
    TooManyHolds {
        /// Configured per-client limit
        limit: u32,
    },

    /// Checkout id already used by an order with different parameters.
    #[error("Checkout id already used: {0}")]
    DuplicateCheckoutId(CheckoutId),

    /// No order with this checkout id.
    #[error("Order not found: {0}")]
    NotFound(CheckoutId),

    /// Order is not in a state that allows the operation.
    #[error("Order {checkout_id} is {from}, cannot become {to}")]
    InvalidTransition {
        /// Targeted order
        checkout_id: CheckoutId,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// Signature missing or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A backing store failed; retrying the whole operation is safe.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    /// The order expired but its inventory could not be returned.
    ///
    /// The fence is already set, so a redelivery will not release again. Needs
    /// manual reconciliation.
    #[error("Order {checkout_id} expired but release failed: {reason}")]
    ReleaseFailed {
        /// Expired order
        checkout_id: CheckoutId,
        /// Underlying store error
        reason: String,
    },

    /// Unexpected failure (signing, serialization).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReservationError {
    /// Whether the caller (or the job transport) should retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ReleaseFailed { .. })
    }
}

impl From<CounterError> for ReservationError {
    fn from(error: CounterError) -> Self {
        match error {
            CounterError::InsufficientInventory {
                tier,
                requested,
                available,
            } => Self::SoldOut {
                tier,
                requested,
                available,
            },
            CounterError::UnknownTier(tier) => Self::UnknownTier(tier),
            CounterError::Backend(message) => Self::Transient(message),
        }
    }
}

impl From<LedgerError> for ReservationError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::DuplicateCheckoutId(id) => Self::DuplicateCheckoutId(id),
            LedgerError::NotFound(id) => Self::NotFound(id),
            LedgerError::InvalidTransition {
                checkout_id,
                from,
                to,
            } => Self::InvalidTransition {
                checkout_id,
                from,
                to,
            },
            LedgerError::Database(message) => Self::Transient(message),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counter_errors_map() {
        let vip = TierId::parse("VIP").unwrap();
        let sold_out: ReservationError = CounterError::InsufficientInventory {
            tier: vip.clone(),
            requested: 3,
            available: 2,
        }
        .into();
        assert_eq!(
            sold_out,
            ReservationError::SoldOut {
                tier: vip,
                requested: 3,
                available: 2
            }
        );

        let backend: ReservationError = CounterError::Backend("timeout".into()).into();
        assert!(backend.is_transient());
    }

    #[test]
    fn ledger_errors_map() {
        let id = CheckoutId::parse("co-1").unwrap();
        let missing: ReservationError = LedgerError::NotFound(id.clone()).into();
        assert_eq!(missing, ReservationError::NotFound(id));
        assert!(!missing.is_transient());

        let db: ReservationError = LedgerError::Database("pool timed out".into()).into();
        assert_eq!(db, ReservationError::Transient("pool timed out".into()));
    }
}

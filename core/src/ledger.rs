//! Order ledger contract: durable orders with conditional state transitions.
//!
//! The ledger owns every write to an [`Order`]. Transitions out of `pending` are
//! conditional updates evaluated by the backing store, so two racing callers
//! (duplicate job delivery, a cancel racing a rollback, a payment racing a
//! rollback) can never both win.
//!
//! # Implementations
//!
//! - `PostgresOrderLedger` (in `boxoffice-postgres`): unique constraint on
//!   `checkout_id`, `UPDATE ... WHERE status = 'pending' RETURNING`
//! - `InMemoryOrderLedger` (in `boxoffice-testing`): fast, deterministic tests

use crate::scheduler::JobId;
use crate::types::{BuyerInfo, CheckoutId, Order, OrderStatus, TierId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A different order already uses this checkout id.
    #[error("Checkout id already used with different parameters: {0}")]
    DuplicateCheckoutId(CheckoutId),

    /// No order with this checkout id.
    #[error("Order not found: {0}")]
    NotFound(CheckoutId),

    /// The order is not in a state that allows the requested transition.
    #[error("Order {checkout_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Order that was targeted
        checkout_id: CheckoutId,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// Database connection or query failed. Safe to retry the whole operation.
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Parameters for a new pending order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Unique checkout identifier
    pub checkout_id: CheckoutId,
    /// Tier held
    pub tier: TierId,
    /// Quantity held
    pub quantity: u32,
    /// Buyer identity
    pub buyer: BuyerInfo,
    /// Session id or network address creating the hold
    pub client_key: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Whether `order` was created from the same parameters.
    ///
    /// Used to turn a retried create into an idempotent success.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        order.checkout_id == self.checkout_id
            && order.tier == self.tier
            && order.quantity == self.quantity
    }

    /// Materialize the pending order row.
    #[must_use]
    pub fn into_pending(self) -> Order {
        Order {
            checkout_id: self.checkout_id,
            tier: self.tier,
            quantity: self.quantity,
            status: OrderStatus::Pending,
            buyer: self.buyer,
            client_key: self.client_key,
            rollback_job_id: None,
            created_at: self.created_at,
            updated_at: self.created_at,
            paid_at: None,
            cancelled_at: None,
            expired_at: None,
            rollback_executed_at: None,
        }
    }
}

/// Result of [`OrderLedger::create_pending`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateOutcome {
    /// The stored order (new or pre-existing)
    pub order: Order,
    /// `false` when an identical order already existed
    pub created: bool,
}

/// Result of the fenced expiry compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryTransition {
    /// `true` only for the single caller that moved the order to `expired`.
    pub transitioned: bool,
}

/// Durable, strongly consistent order storage.
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so the ledger can be shared as `Arc<dyn OrderLedger>`.
pub trait OrderLedger: Send + Sync {
    /// Insert a `pending` order.
    ///
    /// Retrying with the same checkout id, tier and quantity returns the existing
    /// row unchanged with `created: false`.
    ///
    /// # Errors
    ///
    /// - `DuplicateCheckoutId`: checkout id taken by an order with other parameters
    /// - `Database`: store unavailable
    fn create_pending(&self, order: NewOrder) -> BoxFuture<'_, Result<CreateOutcome, LedgerError>>;

    /// Load an order.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `Database`: store unavailable
    fn get_by_checkout_id(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Order, LedgerError>>;

    /// Move a `pending` order to `paid`. Succeeds unchanged if already `paid`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `InvalidTransition`: order is `cancelled` or `expired`
    /// - `Database`: store unavailable
    fn mark_paid(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>>;

    /// Move a `pending` order to `cancelled`.
    ///
    /// Conditional on the row still being `pending`; does not set the rollback fence.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `InvalidTransition`: order is no longer `pending`
    /// - `Database`: store unavailable
    fn mark_cancelled(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>>;

    /// The rollback gate.
    ///
    /// In one atomic step: if `status = 'pending' AND rollback_executed_at IS NULL`,
    /// set `status = 'expired'`, `expired_at = at`, `rollback_executed_at = at` and
    /// report `transitioned: true`. Otherwise change nothing and report `false`.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn mark_expired_if_pending_and_not_rolled_back(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ExpiryTransition, LedgerError>>;

    /// Remember the scheduled rollback job so it can be cancelled later.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `Database`: store unavailable
    fn record_rollback_job(
        &self,
        checkout_id: &CheckoutId,
        job_id: &JobId,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Number of `pending` orders created by a client key.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn count_active_holds(&self, client_key: &str) -> BoxFuture<'_, Result<u32, LedgerError>>;

    /// Sum of `paid` quantities per tier. Authoritative "sold" figure.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn sold_by_tier(&self) -> BoxFuture<'_, Result<BTreeMap<TierId, u64>, LedgerError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn new_order(quantity: u32) -> NewOrder {
        NewOrder {
            checkout_id: CheckoutId::parse("co-1").unwrap(),
            tier: TierId::parse("VIP").unwrap(),
            quantity,
            buyer: BuyerInfo {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                phone: None,
            },
            client_key: Some("10.0.0.1".into()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn into_pending_starts_unfenced() {
        let order = new_order(2).into_pending();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.rollback_executed());
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn matches_compares_tier_and_quantity() {
        let order = new_order(2).into_pending();
        assert!(new_order(2).matches(&order));
        assert!(!new_order(3).matches(&order));
    }

    #[test]
    fn invalid_transition_display() {
        let error = LedgerError::InvalidTransition {
            checkout_id: CheckoutId::parse("co-1").unwrap(),
            from: OrderStatus::Expired,
            to: OrderStatus::Paid,
        };
        assert_eq!(error.to_string(), "Order co-1 cannot move from expired to paid");
        assert!(!error.is_transient());
    }
}

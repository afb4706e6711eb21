//! Reservation coordinator - the synchronous checkout path.
//!
//! ```text
//! reserve_tickets
//!   1. validate, per-client hold limit (advisory)
//!   2. CounterStore::reserve          ── SoldOut: stop, nothing else touched
//!   3. OrderLedger::create_pending    ── failure: release (compensate), stop
//!   4. JobScheduler::schedule         ── failure: logged, hold still valid
//!   5. CounterStore::put_reservation  ── failure: logged
//! ```
//!
//! The counter is only ever moved through `reserve` and `release`; nothing here
//! reads a count and writes it back.

use crate::config::ReservationConfig;
use crate::error::ReservationError;
use crate::metrics;
use boxoffice_core::{
    BuyerInfo, CheckoutId, Clock, CounterStore, JobId, JobScheduler, LedgerError, NewOrder,
    Order, OrderLedger, ReservationMetadata, RollbackPayload, TierId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Limits applied to every reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// Delay before the rollback job fires
    pub hold_window: Duration,
    /// Extra lifetime of reservation metadata beyond the hold window
    pub metadata_grace: Duration,
    /// Maximum tickets per order
    pub max_per_order: u32,
    /// Maximum pending holds per client key (0 = unlimited)
    pub max_active_holds: u32,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_window: Duration::from_secs(15 * 60),
            metadata_grace: Duration::from_secs(60),
            max_per_order: 10,
            max_active_holds: 3,
        }
    }
}

impl ReservationPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub const fn from_config(config: &ReservationConfig) -> Self {
        Self {
            hold_window: Duration::from_secs(config.hold_window_secs),
            metadata_grace: Duration::from_secs(config.metadata_grace_secs),
            max_per_order: config.max_per_order,
            max_active_holds: config.max_active_holds,
        }
    }

    /// When a hold created at `from` is due for rollback.
    #[must_use]
    pub fn deadline(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + chrono::Duration::from_std(self.hold_window)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// A reservation request.
#[derive(Debug, Clone)]
pub struct ReserveTickets {
    /// Client-supplied checkout id; generated when absent
    pub checkout_id: Option<CheckoutId>,
    /// Tier to hold
    pub tier: TierId,
    /// Number of tickets
    pub quantity: u32,
    /// Buyer identity
    pub buyer: BuyerInfo,
    /// Session id or network address, used for the hold limit
    pub client_key: Option<String>,
}

/// A pending hold handed back to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    /// The pending order
    pub order: Order,
    /// When the rollback job is due
    pub expires_at: DateTime<Utc>,
    /// Scheduled rollback job, if scheduling succeeded
    pub job_id: Option<JobId>,
}

/// Runs the reserve and explicit-release paths against the stores.
#[derive(Clone)]
pub struct ReservationCoordinator {
    counters: Arc<dyn CounterStore>,
    ledger: Arc<dyn OrderLedger>,
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    policy: ReservationPolicy,
}

impl ReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        counters: Arc<dyn CounterStore>,
        ledger: Arc<dyn OrderLedger>,
        scheduler: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            counters,
            ledger,
            scheduler,
            clock,
            policy,
        }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Hold `quantity` tickets of `tier` for a buyer.
    ///
    /// Retrying with the same checkout id, tier and quantity returns the original
    /// hold without touching the counter again.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad quantity or buyer details
    /// - `TooManyHolds`: client already at the hold limit
    /// - `SoldOut` / `UnknownTier`: counter refused; nothing was written
    /// - `DuplicateCheckoutId`: checkout id taken by a different order
    /// - `Transient`: a store failed; any counter decrement was compensated
    pub async fn reserve_tickets(
        &self,
        request: ReserveTickets,
    ) -> Result<Reservation, ReservationError> {
        self.validate(&request).inspect_err(|_| {
            metrics::record_reservation_rejected("rejected");
        })?;

        if let Some(checkout_id) = &request.checkout_id {
            if let Some(existing) = self.existing_hold(checkout_id, &request).await? {
                return Ok(existing);
            }
        }

        self.check_hold_limit(request.client_key.as_deref()).await?;

        let ReserveTickets {
            checkout_id,
            tier,
            quantity,
            buyer,
            client_key,
        } = request;
        let checkout_id = checkout_id.unwrap_or_else(CheckoutId::generate);

        let available = match self.counters.reserve(&tier, quantity).await {
            Ok(available) => available,
            Err(error) => {
                let error = ReservationError::from(error);
                let outcome = match error {
                    ReservationError::SoldOut { .. } => "sold_out",
                    ReservationError::UnknownTier(_) => "rejected",
                    _ => "failed",
                };
                metrics::record_reservation_rejected(outcome);
                tracing::info!(tier = %tier, quantity, %error, "Reservation refused by counter store");
                return Err(error);
            }
        };

        let now = self.clock.now();
        let new_order = NewOrder {
            checkout_id: checkout_id.clone(),
            tier: tier.clone(),
            quantity,
            buyer,
            client_key: client_key.clone(),
            created_at: now,
        };

        let mut order = match self.ledger.create_pending(new_order).await {
            Ok(outcome) if outcome.created => outcome.order,
            Ok(outcome) => {
                // An identical retry won the insert; our decrement is surplus.
                self.compensate(&checkout_id, &tier, quantity, "duplicate create")
                    .await;
                return Ok(self.replay(outcome.order));
            }
            Err(error) => {
                self.compensate(&checkout_id, &tier, quantity, &error.to_string())
                    .await;
                metrics::record_reservation_rejected("failed");
                return Err(error.into());
            }
        };

        let job_id = self.schedule_rollback(&mut order).await;

        let expires_at = self.policy.deadline(now);
        let metadata = ReservationMetadata {
            checkout_id: checkout_id.clone(),
            tier: tier.clone(),
            quantity,
            client_key,
            reserved_at: now,
            expires_at,
        };
        let ttl = self.policy.hold_window + self.policy.metadata_grace;
        if let Err(error) = self.counters.put_reservation(&metadata, ttl).await {
            tracing::warn!(checkout_id = %checkout_id, %error, "Failed to store reservation metadata");
        }

        metrics::record_reservation_created(tier.as_str(), quantity, available);
        tracing::info!(
            checkout_id = %checkout_id,
            tier = %tier,
            quantity,
            available,
            expires_at = %expires_at,
            "Reservation created"
        );

        Ok(Reservation {
            order,
            expires_at,
            job_id,
        })
    }

    /// Release a pending hold at the buyer's request.
    ///
    /// Returns `true` only if this call cancelled the order and returned its
    /// tickets. Unknown checkouts, orders that are already terminal, and orders
    /// that a payment or rollback finalized first return `false` without
    /// touching inventory; their stray reservation metadata is still deleted.
    ///
    /// # Errors
    ///
    /// - `ReleaseFailed`: the order was cancelled but the counter release failed
    /// - `Transient`: a store failed before the order changed
    pub async fn release_on_explicit_cancel(
        &self,
        checkout_id: &CheckoutId,
    ) -> Result<bool, ReservationError> {
        let order = match self.ledger.get_by_checkout_id(checkout_id).await {
            Ok(order) => order,
            Err(LedgerError::NotFound(_)) => {
                tracing::debug!(checkout_id = %checkout_id, "Release ignored for unknown checkout");
                self.forget_metadata(checkout_id).await;
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };

        if !order.is_pending() {
            tracing::debug!(checkout_id = %checkout_id, status = %order.status, "Release ignored for terminal order");
            self.forget_metadata(checkout_id).await;
            return Ok(false);
        }

        let cancelled = match self.ledger.mark_cancelled(checkout_id, self.clock.now()).await {
            Ok(order) => order,
            Err(LedgerError::InvalidTransition { from, .. }) => {
                tracing::info!(checkout_id = %checkout_id, status = %from, "Release lost race to another transition");
                self.forget_metadata(checkout_id).await;
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };

        let available = self
            .counters
            .release(&cancelled.tier, cancelled.quantity)
            .await
            .map_err(|error| {
                tracing::error!(
                    checkout_id = %checkout_id,
                    tier = %cancelled.tier,
                    quantity = cancelled.quantity,
                    %error,
                    "Order cancelled but release failed; needs reconciliation"
                );
                ReservationError::ReleaseFailed {
                    checkout_id: checkout_id.clone(),
                    reason: error.to_string(),
                }
            })?;

        if let Some(job_id) = cancelled.rollback_job_id.as_deref().map(JobId::new) {
            match self.scheduler.cancel(&job_id).await {
                Ok(found) => tracing::debug!(checkout_id = %checkout_id, job_id = %job_id, found, "Rollback job cancelled"),
                Err(error) => tracing::warn!(checkout_id = %checkout_id, job_id = %job_id, %error, "Failed to cancel rollback job"),
            }
        }
        self.forget_metadata(checkout_id).await;

        metrics::record_release(cancelled.tier.as_str(), available);
        tracing::info!(
            checkout_id = %checkout_id,
            tier = %cancelled.tier,
            quantity = cancelled.quantity,
            available,
            "Reservation released"
        );
        Ok(true)
    }

    /// Load an order.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `Transient`: ledger unavailable
    pub async fn get_order(&self, checkout_id: &CheckoutId) -> Result<Order, ReservationError> {
        Ok(self.ledger.get_by_checkout_id(checkout_id).await?)
    }

    fn validate(&self, request: &ReserveTickets) -> Result<(), ReservationError> {
        if request.quantity == 0 {
            return Err(ReservationError::Validation(
                "quantity must be greater than 0".to_string(),
            ));
        }
        if request.quantity > self.policy.max_per_order {
            return Err(ReservationError::Validation(format!(
                "cannot reserve more than {} tickets at once",
                self.policy.max_per_order
            )));
        }
        if request.buyer.name.trim().is_empty() {
            return Err(ReservationError::Validation("buyer name is required".to_string()));
        }
        let email = request.buyer.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ReservationError::Validation(
                "a valid buyer email is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn existing_hold(
        &self,
        checkout_id: &CheckoutId,
        request: &ReserveTickets,
    ) -> Result<Option<Reservation>, ReservationError> {
        match self.ledger.get_by_checkout_id(checkout_id).await {
            Ok(order) if order.tier == request.tier && order.quantity == request.quantity => {
                tracing::debug!(checkout_id = %checkout_id, "Replaying existing reservation");
                Ok(Some(self.replay(order)))
            }
            Ok(_) => Err(ReservationError::DuplicateCheckoutId(checkout_id.clone())),
            Err(LedgerError::NotFound(_)) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn check_hold_limit(&self, client_key: Option<&str>) -> Result<(), ReservationError> {
        let limit = self.policy.max_active_holds;
        let Some(client_key) = client_key.filter(|_| limit > 0) else {
            return Ok(());
        };

        let active = self.ledger.count_active_holds(client_key).await?;
        if active >= limit {
            metrics::record_reservation_rejected("too_many_holds");
            tracing::info!(client_key, active, limit, "Hold limit reached");
            return Err(ReservationError::TooManyHolds { limit });
        }
        Ok(())
    }

    fn replay(&self, order: Order) -> Reservation {
        Reservation {
            expires_at: self.policy.deadline(order.created_at),
            job_id: order.rollback_job_id.as_deref().map(JobId::new),
            order,
        }
    }

    async fn compensate(&self, checkout_id: &CheckoutId, tier: &TierId, quantity: u32, reason: &str) {
        match self.counters.release(tier, quantity).await {
            Ok(available) => {
                metrics::record_compensation(true);
                tracing::warn!(
                    checkout_id = %checkout_id,
                    tier = %tier,
                    quantity,
                    available,
                    reason,
                    "Compensated counter after failed order write"
                );
            }
            Err(error) => {
                metrics::record_compensation(false);
                tracing::error!(
                    checkout_id = %checkout_id,
                    tier = %tier,
                    quantity,
                    reason,
                    %error,
                    "Orphaned reservation: compensation release failed"
                );
            }
        }
    }

    async fn schedule_rollback(&self, order: &mut Order) -> Option<JobId> {
        let payload = RollbackPayload {
            checkout_id: order.checkout_id.clone(),
            tier: order.tier.clone(),
            quantity: order.quantity,
        };

        let job_id = match self.scheduler.schedule(&payload, self.policy.hold_window).await {
            Ok(job_id) => job_id,
            Err(error) => {
                metrics::record_scheduler_failure();
                tracing::error!(
                    checkout_id = %order.checkout_id,
                    tier = %order.tier,
                    quantity = order.quantity,
                    %error,
                    "Failed to schedule rollback job; hold will not expire automatically"
                );
                return None;
            }
        };

        match self.ledger.record_rollback_job(&order.checkout_id, &job_id).await {
            Ok(()) => order.rollback_job_id = Some(job_id.to_string()),
            Err(error) => {
                tracing::warn!(checkout_id = %order.checkout_id, job_id = %job_id, %error, "Failed to record rollback job id");
            }
        }
        Some(job_id)
    }

    async fn forget_metadata(&self, checkout_id: &CheckoutId) {
        if let Err(error) = self.counters.delete_reservation(checkout_id).await {
            tracing::warn!(checkout_id = %checkout_id, %error, "Failed to delete reservation metadata");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::OrderStatus;
    use boxoffice_testing::helpers::{buyer, checkout, tier};
    use boxoffice_testing::{
        FixedClock, InMemoryCounterStore, InMemoryOrderLedger, RecordingScheduler, test_clock,
    };

    struct Fixture {
        counters: InMemoryCounterStore,
        ledger: InMemoryOrderLedger,
        scheduler: RecordingScheduler,
        clock: Arc<FixedClock>,
        coordinator: ReservationCoordinator,
    }

    fn fixture(capacity: u32) -> Fixture {
        let counters = InMemoryCounterStore::with_tiers([(&tier("GA"), capacity)]);
        let ledger = InMemoryOrderLedger::new();
        let scheduler = RecordingScheduler::new();
        let clock = Arc::new(test_clock());
        let coordinator = ReservationCoordinator::new(
            Arc::new(counters.clone()),
            Arc::new(ledger.clone()),
            Arc::new(scheduler.clone()),
            clock.clone(),
            ReservationPolicy::default(),
        );
        Fixture {
            counters,
            ledger,
            scheduler,
            clock,
            coordinator,
        }
    }

    fn request(id: Option<&str>, quantity: u32) -> ReserveTickets {
        ReserveTickets {
            checkout_id: id.map(checkout),
            tier: tier("GA"),
            quantity,
            buyer: buyer("Ada Lovelace"),
            client_key: Some("10.0.0.1".to_string()),
        }
    }

    #[tokio::test]
    async fn reserve_holds_schedules_and_stores_metadata() {
        let f = fixture(10);
        let reservation = f.coordinator.reserve_tickets(request(None, 3)).await.unwrap();

        assert_eq!(reservation.order.status, OrderStatus::Pending);
        assert_eq!(f.counters.available(&tier("GA")), Some(7));
        assert_eq!(
            reservation.expires_at,
            f.clock.now() + chrono::Duration::minutes(15)
        );

        let jobs = f.scheduler.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].delay, Duration::from_secs(900));
        assert_eq!(jobs[0].payload.quantity, 3);
        assert_eq!(reservation.job_id, Some(jobs[0].job_id.clone()));

        let stored = f.ledger.order(&reservation.order.checkout_id).unwrap();
        assert_eq!(stored.rollback_job_id.as_deref(), Some(jobs[0].job_id.as_str()));
        assert!(f.counters.has_reservation(&reservation.order.checkout_id));
    }

    #[tokio::test]
    async fn validation_happens_before_side_effects() {
        let f = fixture(10);

        for bad in [request(None, 0), request(None, 11)] {
            let result = f.coordinator.reserve_tickets(bad).await;
            assert!(matches!(result, Err(ReservationError::Validation(_))));
        }

        let mut no_email = request(None, 1);
        no_email.buyer.email = "not-an-email".to_string();
        assert!(matches!(
            f.coordinator.reserve_tickets(no_email).await,
            Err(ReservationError::Validation(_))
        ));

        assert_eq!(f.counters.available(&tier("GA")), Some(10));
        assert!(f.ledger.is_empty());
    }

    #[tokio::test]
    async fn retry_with_same_checkout_id_does_not_double_hold() {
        let f = fixture(10);
        let first = f
            .coordinator
            .reserve_tickets(request(Some("co-retry"), 2))
            .await
            .unwrap();
        let again = f
            .coordinator
            .reserve_tickets(request(Some("co-retry"), 2))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(f.counters.available(&tier("GA")), Some(8));
        assert_eq!(f.scheduler.jobs().len(), 1);

        let conflict = f
            .coordinator
            .reserve_tickets(request(Some("co-retry"), 3))
            .await;
        assert_eq!(
            conflict,
            Err(ReservationError::DuplicateCheckoutId(checkout("co-retry")))
        );
    }

    #[tokio::test]
    async fn hold_limit_counts_pending_orders() {
        let f = fixture(10);
        for _ in 0..3 {
            f.coordinator.reserve_tickets(request(None, 1)).await.unwrap();
        }

        let fourth = f.coordinator.reserve_tickets(request(None, 1)).await;
        assert_eq!(fourth, Err(ReservationError::TooManyHolds { limit: 3 }));
        assert_eq!(f.counters.available(&tier("GA")), Some(7));

        let mut other_client = request(None, 1);
        other_client.client_key = Some("10.0.0.2".to_string());
        assert!(f.coordinator.reserve_tickets(other_client).await.is_ok());
    }

    #[tokio::test]
    async fn scheduler_failure_keeps_the_hold() {
        let f = fixture(10);
        f.scheduler.set_failing(true);

        let reservation = f.coordinator.reserve_tickets(request(None, 2)).await.unwrap();

        assert_eq!(reservation.job_id, None);
        assert_eq!(f.counters.available(&tier("GA")), Some(8));
        assert!(f.ledger.order(&reservation.order.checkout_id).is_some());
    }

    #[tokio::test]
    async fn release_cancels_job_and_returns_inventory() {
        let f = fixture(10);
        let reservation = f.coordinator.reserve_tickets(request(None, 4)).await.unwrap();
        let id = reservation.order.checkout_id.clone();

        assert!(f.coordinator.release_on_explicit_cancel(&id).await.unwrap());
        assert_eq!(f.counters.available(&tier("GA")), Some(10));
        assert!(f.scheduler.was_cancelled(&reservation.job_id.unwrap()));
        assert!(!f.counters.has_reservation(&id));

        let order = f.coordinator.get_order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.rollback_executed_at.is_none());

        assert!(!f.coordinator.release_on_explicit_cancel(&id).await.unwrap());
        assert_eq!(f.counters.available(&tier("GA")), Some(10));
    }

    #[tokio::test]
    async fn release_of_unknown_order_cleans_stray_metadata() {
        let f = fixture(10);
        let now = f.clock.now();
        let stray = ReservationMetadata {
            checkout_id: checkout("co-stray"),
            tier: tier("GA"),
            quantity: 2,
            client_key: None,
            reserved_at: now,
            expires_at: now,
        };
        f.counters
            .put_reservation(&stray, std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let result = f
            .coordinator
            .release_on_explicit_cancel(&checkout("co-stray"))
            .await;

        assert_eq!(result, Ok(false));
        assert!(!f.counters.has_reservation(&checkout("co-stray")));
        assert_eq!(f.counters.available(&tier("GA")), Some(10));
        assert_eq!(f.counters.release_calls(), 0);
    }

    #[tokio::test]
    async fn release_with_ledger_down_is_transient() {
        let f = fixture(10);
        f.ledger.set_unavailable(true);

        let result = f
            .coordinator
            .release_on_explicit_cancel(&checkout("co-down"))
            .await;

        assert!(matches!(result, Err(ReservationError::Transient(_))));
    }
}

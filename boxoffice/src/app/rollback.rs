//! Rollback handler - deferred, idempotent release of unpaid holds.
//!
//! The job transport delivers at least once, possibly long after the hold window,
//! possibly after the order was paid or cancelled. Inventory is released only by
//! the single delivery that wins the ledger's fenced `pending → expired` update:
//!
//! ```text
//! verify signature ──✗──► Unauthorized (nothing read)
//!        │
//! load order ──── missing ──► no_order
//!        │ ────── terminal ─► already_paid | already_cancelled | already_rolled_back | already_expired
//!        ▼
//! mark_expired_if_pending_and_not_rolled_back
//!        │ ────── lost ─────► re-read, report the winner
//!        ▼
//! release(tier, quantity) from the ledger row ──✗──► ReleaseFailed (fence already set)
//! ```

use crate::error::ReservationError;
use crate::metrics;
use boxoffice_core::{
    CheckoutId, Clock, CounterStore, LedgerError, Order, OrderLedger, RollbackOutcome,
    RollbackPayload, SignatureVerifier,
};
use std::sync::Arc;

/// Handles rollback job deliveries.
#[derive(Clone)]
pub struct RollbackHandler {
    counters: Arc<dyn CounterStore>,
    ledger: Arc<dyn OrderLedger>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
}

impl RollbackHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(
        counters: Arc<dyn CounterStore>,
        ledger: Arc<dyn OrderLedger>,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            counters,
            ledger,
            verifier,
            clock,
        }
    }

    /// Process one delivery: the transport's signature plus the exact raw body.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: signature missing or invalid; nothing was read or written
    /// - `Validation`: body is not a rollback payload
    /// - `Transient`: a store failed before the outcome was decided; redeliver
    /// - `ReleaseFailed`: the order expired but its tickets were not returned
    pub async fn handle_delivery(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<RollbackOutcome, ReservationError> {
        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            metrics::record_rollback("unauthorized");
            tracing::warn!("Rollback delivery without signature rejected");
            return Err(ReservationError::Unauthorized(
                "missing job signature".to_string(),
            ));
        };
        if !self.verifier.verify(signature, body) {
            metrics::record_rollback("unauthorized");
            tracing::warn!(body_len = body.len(), "Rollback delivery with invalid signature rejected");
            return Err(ReservationError::Unauthorized(
                "invalid job signature".to_string(),
            ));
        }

        let payload: RollbackPayload = serde_json::from_slice(body).map_err(|e| {
            ReservationError::Validation(format!("malformed rollback payload: {e}"))
        })?;

        self.process(&payload).await
    }

    /// Apply a verified payload.
    ///
    /// # Errors
    ///
    /// See [`handle_delivery`](Self::handle_delivery).
    pub async fn process(
        &self,
        payload: &RollbackPayload,
    ) -> Result<RollbackOutcome, ReservationError> {
        let checkout_id = &payload.checkout_id;

        let order = match self.ledger.get_by_checkout_id(checkout_id).await {
            Ok(order) => order,
            Err(LedgerError::NotFound(_)) => {
                tracing::warn!(checkout_id = %checkout_id, "Rollback for unknown checkout; nothing released");
                return Ok(self.finish(payload, RollbackOutcome::NoOrder).await);
            }
            Err(error) => return Err(error.into()),
        };

        if order.tier != payload.tier || order.quantity != payload.quantity {
            tracing::warn!(
                checkout_id = %checkout_id,
                payload_tier = %payload.tier,
                payload_quantity = payload.quantity,
                tier = %order.tier,
                quantity = order.quantity,
                "Rollback payload disagrees with ledger; using ledger values"
            );
        }

        if let Some(outcome) = RollbackOutcome::for_terminal(&order) {
            return Ok(self.finish(payload, outcome).await);
        }

        let gate = self
            .ledger
            .mark_expired_if_pending_and_not_rolled_back(checkout_id, self.clock.now())
            .await?;

        if !gate.transitioned {
            let current = self.ledger.get_by_checkout_id(checkout_id).await?;
            return match RollbackOutcome::for_terminal(&current) {
                Some(outcome) => {
                    tracing::info!(checkout_id = %checkout_id, %outcome, "Rollback lost race to another transition");
                    Ok(self.finish(payload, outcome).await)
                }
                None => Err(ReservationError::Transient(format!(
                    "order {checkout_id} still pending after expiry gate"
                ))),
            };
        }

        self.release_expired(&order).await?;
        Ok(self.finish(payload, RollbackOutcome::RolledBack).await)
    }

    async fn release_expired(&self, order: &Order) -> Result<(), ReservationError> {
        match self.counters.release(&order.tier, order.quantity).await {
            Ok(available) => {
                metrics::record_available(order.tier.as_str(), available);
                tracing::info!(
                    checkout_id = %order.checkout_id,
                    tier = %order.tier,
                    quantity = order.quantity,
                    available,
                    "Expired hold released"
                );
                Ok(())
            }
            Err(error) => {
                metrics::record_rollback_release_failure();
                tracing::error!(
                    checkout_id = %order.checkout_id,
                    tier = %order.tier,
                    quantity = order.quantity,
                    %error,
                    "Order expired but release failed; needs reconciliation"
                );
                self.forget_metadata(&order.checkout_id).await;
                Err(ReservationError::ReleaseFailed {
                    checkout_id: order.checkout_id.clone(),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn finish(&self, payload: &RollbackPayload, outcome: RollbackOutcome) -> RollbackOutcome {
        self.forget_metadata(&payload.checkout_id).await;
        metrics::record_rollback(outcome.as_str());
        tracing::debug!(checkout_id = %payload.checkout_id, %outcome, "Rollback delivery handled");
        outcome
    }

    /// Best effort: the metadata key also carries a TTL.
    async fn forget_metadata(&self, checkout_id: &CheckoutId) {
        if let Err(error) = self.counters.delete_reservation(checkout_id).await {
            tracing::warn!(checkout_id = %checkout_id, %error, "Failed to delete reservation metadata");
        }
    }
}

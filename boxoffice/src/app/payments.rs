//! Payment confirmation: `pending → paid`, ticket issuance and delivery.
//!
//! The checkout provider reports success asynchronously and may repeat itself.
//! Every step is idempotent: `mark_paid` succeeds unchanged on a paid order and the
//! registry returns the existing ticket set instead of minting a second one.

use crate::error::ReservationError;
use crate::metrics;
use boxoffice_core::tickets::TicketClaims;
use boxoffice_core::{
    CheckoutId, Clock, CounterStore, JobId, JobScheduler, LedgerError, Order, OrderLedger,
    OrderStatus, SignatureVerifier, Ticket, TicketId, TicketMailer, TicketRegistry, TicketSigner,
    TicketStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of a payment provider notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    /// Checkout that was paid
    pub checkout_id: CheckoutId,
}

/// A paid order and its tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmation {
    /// The order, now `paid`
    pub order: Order,
    /// Issued tickets, one per unit
    pub tickets: Vec<Ticket>,
}

/// Collaborators of [`PaymentService`].
#[derive(Clone)]
pub struct PaymentDependencies {
    /// Order ledger
    pub ledger: Arc<dyn OrderLedger>,
    /// Counter store (reservation metadata cleanup)
    pub counters: Arc<dyn CounterStore>,
    /// Issued ticket storage
    pub registry: Arc<dyn TicketRegistry>,
    /// QR payload signer
    pub signer: Arc<dyn TicketSigner>,
    /// Ticket email delivery
    pub mailer: Arc<dyn TicketMailer>,
    /// Job transport, to cancel the pending rollback
    pub scheduler: Arc<dyn JobScheduler>,
    /// Verifies the provider's webhook signature
    pub verifier: Arc<dyn SignatureVerifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Confirms payments reported by the checkout provider.
#[derive(Clone)]
pub struct PaymentService {
    deps: PaymentDependencies,
}

impl PaymentService {
    /// Create the service.
    #[must_use]
    pub const fn new(deps: PaymentDependencies) -> Self {
        Self { deps }
    }

    /// Verify and apply a provider notification.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: signature missing or invalid
    /// - `Validation`: body is not a notification
    /// - everything [`confirm_payment`](Self::confirm_payment) returns
    pub async fn handle_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<PaymentConfirmation, ReservationError> {
        let verified =
            signature.is_some_and(|s| !s.is_empty() && self.deps.verifier.verify(s, body));
        if !verified {
            tracing::warn!("Payment notification with missing or invalid signature rejected");
            return Err(ReservationError::Unauthorized(
                "invalid payment signature".to_string(),
            ));
        }

        let notification: PaymentNotification = serde_json::from_slice(body).map_err(|e| {
            ReservationError::Validation(format!("malformed payment notification: {e}"))
        })?;

        self.confirm_payment(&notification.checkout_id).await
    }

    /// Mark an order paid and make sure its tickets exist.
    ///
    /// The ticket email goes out only when this call minted the tickets.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown checkout id
    /// - `InvalidTransition`: the order already expired or was cancelled; refund needed
    /// - `Internal`: a QR payload could not be signed
    /// - `Transient`: a store failed; retrying is safe
    pub async fn confirm_payment(
        &self,
        checkout_id: &CheckoutId,
    ) -> Result<PaymentConfirmation, ReservationError> {
        let now = self.deps.clock.now();
        let order = match self.deps.ledger.mark_paid(checkout_id, now).await {
            Ok(order) => order,
            Err(LedgerError::InvalidTransition { from, .. }) => {
                metrics::record_payment("rejected");
                tracing::error!(
                    checkout_id = %checkout_id,
                    status = %from,
                    "Payment received for order that is no longer pending; refund required"
                );
                return Err(ReservationError::InvalidTransition {
                    checkout_id: checkout_id.clone(),
                    from,
                    to: OrderStatus::Paid,
                });
            }
            Err(error) => return Err(error.into()),
        };

        let (tickets, newly_issued) = self.ensure_tickets(&order).await?;

        if newly_issued {
            metrics::record_tickets_issued(tickets.len());
            if let Err(error) = self.deps.mailer.send_tickets(&order, &tickets).await {
                tracing::warn!(
                    checkout_id = %checkout_id,
                    %error,
                    "Ticket email failed; tickets remain valid"
                );
            }
        }

        if let Some(job_id) = order.rollback_job_id.as_deref().map(JobId::new) {
            match self.deps.scheduler.cancel(&job_id).await {
                Ok(found) => {
                    tracing::debug!(checkout_id = %checkout_id, job_id = %job_id, found, "Rollback job cancelled");
                }
                Err(error) => {
                    tracing::warn!(
                        checkout_id = %checkout_id,
                        job_id = %job_id,
                        %error,
                        "Failed to cancel rollback job; the delivery will find the order paid"
                    );
                }
            }
        }
        if let Err(error) = self.deps.counters.delete_reservation(checkout_id).await {
            tracing::warn!(checkout_id = %checkout_id, %error, "Failed to delete reservation metadata");
        }

        metrics::record_payment("confirmed");
        tracing::info!(
            checkout_id = %checkout_id,
            tier = %order.tier,
            quantity = order.quantity,
            tickets = tickets.len(),
            newly_issued,
            "Payment confirmed"
        );

        Ok(PaymentConfirmation { order, tickets })
    }

    async fn ensure_tickets(
        &self,
        order: &Order,
    ) -> Result<(Vec<Ticket>, bool), ReservationError> {
        let existing = self.deps.registry.list_for_order(&order.checkout_id).await?;
        if !existing.is_empty() {
            return Ok((existing, false));
        }

        let minted = (0..order.quantity)
            .map(|_| self.mint(order))
            .collect::<Result<Vec<_>, _>>()?;
        let first_minted = minted.first().map(|t| t.id);

        let issued = self
            .deps
            .registry
            .issue_for_order(&order.checkout_id, minted)
            .await?;
        let newly_issued = issued.first().map(|t| t.id) == first_minted;
        Ok((issued, newly_issued))
    }

    fn mint(&self, order: &Order) -> Result<Ticket, ReservationError> {
        let id = TicketId::new();
        let claims = TicketClaims {
            ticket_id: id,
            buyer_name: order.buyer.name.clone(),
            tier: order.tier.clone(),
        };
        let qr_payload = self
            .deps
            .signer
            .sign(&claims)
            .map_err(|e| ReservationError::Internal(e.to_string()))?;

        Ok(Ticket {
            id,
            checkout_id: order.checkout_id.clone(),
            tier: order.tier.clone(),
            status: TicketStatus::Active,
            buyer_name: order.buyer.name.clone(),
            buyer_email: order.buyer.email.clone(),
            qr_payload,
            issued_at: self.deps.clock.now(),
            scanned_at: None,
        })
    }
}

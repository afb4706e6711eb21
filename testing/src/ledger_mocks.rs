//! In-memory order ledger and ticket registry.
//!
//! Conditional transitions are evaluated under one lock, mirroring the
//! `UPDATE ... WHERE status = 'pending' RETURNING` statements of the Postgres ledger.

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned locks is acceptable

use boxoffice_core::{
    BoxFuture, CheckoutId, CreateOutcome, ExpiryTransition, JobId, LedgerError, NewOrder, Order, OrderLedger,
    OrderStatus, ScanOutcome, Ticket, TicketId, TicketRegistry, TicketStatus, TierId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory order ledger.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderLedger {
    orders: Arc<Mutex<HashMap<CheckoutId, Order>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a transient database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert or replace an order as-is, bypassing transition rules.
    ///
    /// Used to set up states such as an order expired without the fence.
    pub fn insert(&self, order: Order) {
        self.orders
            .lock()
            .unwrap()
            .insert(order.checkout_id.clone(), order);
    }

    /// Read an order synchronously.
    #[must_use]
    pub fn order(&self, checkout_id: &CheckoutId) -> Option<Order> {
        self.orders.lock().unwrap().get(checkout_id).cloned()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Check if the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.lock().unwrap().is_empty()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("ledger unavailable".to_string()));
        }
        Ok(())
    }

    fn apply_create(&self, new: NewOrder) -> Result<CreateOutcome, LedgerError> {
        self.check_available()?;
        let mut orders = self.orders.lock().unwrap();
        if let Some(existing) = orders.get(&new.checkout_id) {
            return if new.matches(existing) {
                Ok(CreateOutcome {
                    order: existing.clone(),
                    created: false,
                })
            } else {
                Err(LedgerError::DuplicateCheckoutId(new.checkout_id))
            };
        }
        let order = new.into_pending();
        orders.insert(order.checkout_id.clone(), order.clone());
        Ok(CreateOutcome {
            order,
            created: true,
        })
    }

    fn apply_transition(
        &self,
        checkout_id: &CheckoutId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, LedgerError> {
        self.check_available()?;
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(checkout_id)
            .ok_or_else(|| LedgerError::NotFound(checkout_id.clone()))?;

        if order.status == to && to == OrderStatus::Paid {
            return Ok(order.clone());
        }
        if !order.is_pending() {
            return Err(LedgerError::InvalidTransition {
                checkout_id: checkout_id.clone(),
                from: order.status,
                to,
            });
        }

        order.status = to;
        order.updated_at = at;
        match to {
            OrderStatus::Paid => order.paid_at = Some(at),
            OrderStatus::Cancelled => order.cancelled_at = Some(at),
            OrderStatus::Expired => order.expired_at = Some(at),
            OrderStatus::Pending => {}
        }
        Ok(order.clone())
    }

    fn apply_expiry(&self, checkout_id: &CheckoutId, at: DateTime<Utc>) -> Result<ExpiryTransition, LedgerError> {
        self.check_available()?;
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(checkout_id) else {
            return Ok(ExpiryTransition { transitioned: false });
        };
        if !order.is_pending() || order.rollback_executed() {
            return Ok(ExpiryTransition { transitioned: false });
        }
        order.status = OrderStatus::Expired;
        order.expired_at = Some(at);
        order.rollback_executed_at = Some(at);
        order.updated_at = at;
        Ok(ExpiryTransition { transitioned: true })
    }
}

impl OrderLedger for InMemoryOrderLedger {
    fn create_pending(&self, order: NewOrder) -> BoxFuture<'_, Result<CreateOutcome, LedgerError>> {
        let result = self.apply_create(order);
        Box::pin(async move { result })
    }

    fn get_by_checkout_id(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let result = self.check_available().and_then(|()| {
            self.order(checkout_id)
                .ok_or_else(|| LedgerError::NotFound(checkout_id.clone()))
        });
        Box::pin(async move { result })
    }

    fn mark_paid(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let result = self.apply_transition(checkout_id, OrderStatus::Paid, at);
        Box::pin(async move { result })
    }

    fn mark_cancelled(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let result = self.apply_transition(checkout_id, OrderStatus::Cancelled, at);
        Box::pin(async move { result })
    }

    fn mark_expired_if_pending_and_not_rolled_back(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ExpiryTransition, LedgerError>> {
        let result = self.apply_expiry(checkout_id, at);
        Box::pin(async move { result })
    }

    fn record_rollback_job(
        &self,
        checkout_id: &CheckoutId,
        job_id: &JobId,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let result = self.check_available().and_then(|()| {
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(checkout_id)
                .ok_or_else(|| LedgerError::NotFound(checkout_id.clone()))?;
            order.rollback_job_id = Some(job_id.as_str().to_string());
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn count_active_holds(&self, client_key: &str) -> BoxFuture<'_, Result<u32, LedgerError>> {
        let result = self.check_available().map(|()| {
            let count = self
                .orders
                .lock()
                .unwrap()
                .values()
                .filter(|o| o.is_pending() && o.client_key.as_deref() == Some(client_key))
                .count();
            u32::try_from(count).unwrap_or(u32::MAX)
        });
        Box::pin(async move { result })
    }

    fn sold_by_tier(&self) -> BoxFuture<'_, Result<BTreeMap<TierId, u64>, LedgerError>> {
        let result = self.check_available().map(|()| {
            let mut sold = BTreeMap::new();
            for order in self.orders.lock().unwrap().values() {
                if order.status == OrderStatus::Paid {
                    *sold.entry(order.tier.clone()).or_insert(0) += u64::from(order.quantity);
                }
            }
            sold
        });
        Box::pin(async move { result })
    }
}

/// In-memory ticket registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketRegistry {
    tickets: Arc<Mutex<Vec<Ticket>>>,
}

impl InMemoryTicketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a ticket's status, e.g. to void it.
    pub fn set_status(&self, ticket_id: TicketId, status: TicketStatus) {
        if let Some(ticket) = self
            .tickets
            .lock()
            .unwrap()
            .iter_mut()
            .find(|t| t.id == ticket_id)
        {
            ticket.status = status;
        }
    }

    /// Total number of issued tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }

    /// Check if no tickets were issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.lock().unwrap().is_empty()
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    fn issue_for_order(
        &self,
        checkout_id: &CheckoutId,
        tickets: Vec<Ticket>,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>> {
        let mut stored = self.tickets.lock().unwrap();
        let existing: Vec<Ticket> = stored
            .iter()
            .filter(|t| &t.checkout_id == checkout_id)
            .cloned()
            .collect();
        let result = if existing.is_empty() {
            stored.extend(tickets.iter().cloned());
            tickets
        } else {
            existing
        };
        Box::pin(async move { Ok(result) })
    }

    fn list_for_order(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>> {
        let result: Vec<Ticket> = self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .filter(|t| &t.checkout_id == checkout_id)
            .cloned()
            .collect();
        Box::pin(async move { Ok(result) })
    }

    fn mark_used(&self, ticket_id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, Result<ScanOutcome, LedgerError>> {
        let mut stored = self.tickets.lock().unwrap();
        let outcome = match stored.iter_mut().find(|t| t.id == ticket_id) {
            None => ScanOutcome::Unknown,
            Some(ticket) => match ticket.status {
                TicketStatus::Void => ScanOutcome::Void,
                TicketStatus::Used => ScanOutcome::AlreadyScanned {
                    scanned_at: ticket.scanned_at.unwrap_or(at),
                },
                TicketStatus::Active => {
                    ticket.status = TicketStatus::Used;
                    ticket.scanned_at = Some(at);
                    ScanOutcome::Admitted {
                        ticket: ticket.clone(),
                    }
                }
            },
        };
        Box::pin(async move { Ok(outcome) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{buyer, checkout, tier};
    use crate::test_clock;
    use boxoffice_core::Clock;

    fn new_order(id: &str, quantity: u32, client: &str) -> NewOrder {
        NewOrder {
            checkout_id: checkout(id),
            tier: tier("VIP"),
            quantity,
            buyer: buyer("Ada Lovelace"),
            client_key: Some(client.to_string()),
            created_at: test_clock().now(),
        }
    }

    fn ticket_for(id: &str) -> Ticket {
        Ticket {
            id: TicketId::new(),
            checkout_id: checkout(id),
            tier: tier("VIP"),
            status: TicketStatus::Active,
            buyer_name: "Ada Lovelace".to_string(),
            buyer_email: "ada.lovelace@example.com".to_string(),
            qr_payload: "payload".to_string(),
            issued_at: test_clock().now(),
            scanned_at: None,
        }
    }

    #[tokio::test]
    async fn create_pending_is_idempotent_for_same_parameters() {
        let ledger = InMemoryOrderLedger::new();
        let first = ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();
        let second = ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.order, second.order);

        let err = ledger
            .create_pending(new_order("co-1", 3, "a"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateCheckoutId(checkout("co-1")));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn expiry_gate_transitions_once() {
        let ledger = InMemoryOrderLedger::new();
        let id = checkout("co-1");
        ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();
        let at = test_clock().now();

        let first = ledger
            .mark_expired_if_pending_and_not_rolled_back(&id, at)
            .await
            .unwrap();
        let second = ledger
            .mark_expired_if_pending_and_not_rolled_back(&id, at)
            .await
            .unwrap();

        assert!(first.transitioned);
        assert!(!second.transitioned);
        let order = ledger.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.rollback_executed_at, Some(at));
    }

    #[tokio::test]
    async fn paid_orders_cannot_expire_or_cancel() {
        let ledger = InMemoryOrderLedger::new();
        let id = checkout("co-1");
        ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();
        let at = test_clock().now();

        ledger.mark_paid(&id, at).await.unwrap();
        // Paying twice is fine.
        assert_eq!(ledger.mark_paid(&id, at).await.unwrap().status, OrderStatus::Paid);

        let gate = ledger
            .mark_expired_if_pending_and_not_rolled_back(&id, at)
            .await
            .unwrap();
        assert!(!gate.transitioned);
        assert!(matches!(
            ledger.mark_cancelled(&id, at).await,
            Err(LedgerError::InvalidTransition { from: OrderStatus::Paid, .. })
        ));
    }

    #[tokio::test]
    async fn cancel_does_not_set_fence() {
        let ledger = InMemoryOrderLedger::new();
        let id = checkout("co-1");
        ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();

        let order = ledger.mark_cancelled(&id, test_clock().now()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(!order.rollback_executed());
    }

    #[tokio::test]
    async fn holds_and_sold_counts() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create_pending(new_order("co-1", 2, "a")).await.unwrap();
        ledger.create_pending(new_order("co-2", 3, "a")).await.unwrap();
        ledger.create_pending(new_order("co-3", 1, "b")).await.unwrap();
        ledger.mark_paid(&checkout("co-2"), test_clock().now()).await.unwrap();

        assert_eq!(ledger.count_active_holds("a").await.unwrap(), 1);
        assert_eq!(ledger.count_active_holds("b").await.unwrap(), 1);
        assert_eq!(ledger.sold_by_tier().await.unwrap()[&tier("VIP")], 3);
    }

    #[tokio::test]
    async fn unavailable_ledger_is_transient() {
        let ledger = InMemoryOrderLedger::new();
        ledger.set_unavailable(true);
        let err = ledger
            .create_pending(new_order("co-1", 1, "a"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn registry_issues_once_and_scans_once() {
        let registry = InMemoryTicketRegistry::new();
        let id = checkout("co-1");

        let issued = registry
            .issue_for_order(&id, vec![ticket_for("co-1"), ticket_for("co-1")])
            .await
            .unwrap();
        let again = registry
            .issue_for_order(&id, vec![ticket_for("co-1")])
            .await
            .unwrap();
        assert_eq!(issued, again);
        assert_eq!(registry.len(), 2);

        let at = test_clock().now();
        let first = registry.mark_used(issued[0].id, at).await.unwrap();
        assert!(matches!(first, ScanOutcome::Admitted { .. }));
        let second = registry.mark_used(issued[0].id, at).await.unwrap();
        assert_eq!(second, ScanOutcome::AlreadyScanned { scanned_at: at });

        registry.set_status(issued[1].id, TicketStatus::Void);
        assert_eq!(registry.mark_used(issued[1].id, at).await.unwrap(), ScanOutcome::Void);
        assert_eq!(
            registry.mark_used(TicketId::new(), at).await.unwrap(),
            ScanOutcome::Unknown
        );
    }
}

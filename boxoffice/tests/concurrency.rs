//! Races between holds, releases, rollback deliveries and payments.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use boxoffice::ReservationError;
use boxoffice_core::{OrderStatus, RollbackOutcome};
use boxoffice_testing::helpers::{checkout, tier};
use common::{Harness, JOB_SIGNATURE, reserve};
use proptest::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_holds_never_oversell() {
    let h = Harness::with_capacities(20, 2);

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .reserve_tickets(reserve(&format!("co-{i}"), "VIP", 1 + i % 3))
                    .await
            })
        })
        .collect();

    let mut held = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(reservation) => held += reservation.order.quantity,
            Err(ReservationError::SoldOut { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let available = h.counters.available(&tier("VIP")).unwrap();
    assert!(held <= 20);
    assert_eq!(held + available, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn duplicate_deliveries_release_exactly_once() {
    let h = Harness::new();
    h.coordinator
        .reserve_tickets(reserve("co-dup", "VIP", 4))
        .await
        .unwrap();
    let body = Harness::delivery_body(&h.rollback_payload("co-dup"));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let rollback = h.rollback.clone();
            let body = body.clone();
            tokio::spawn(async move { rollback.handle_delivery(Some(JOB_SIGNATURE), &body).await })
        })
        .collect();

    let mut rolled_back = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            RollbackOutcome::RolledBack => rolled_back += 1,
            RollbackOutcome::AlreadyRolledBack => {}
            other => panic!("unexpected outcome: {other}"),
        }
    }

    assert_eq!(rolled_back, 1);
    assert_eq!(h.counters.available(&tier("VIP")), Some(5));
    assert_eq!(h.counters.release_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn payment_racing_rollback_has_one_winner() {
    for round in 0..20 {
        let h = Harness::new();
        let id = format!("co-race-{round}");
        h.coordinator
            .reserve_tickets(reserve(&id, "VIP", 2))
            .await
            .unwrap();
        let body = Harness::delivery_body(&h.rollback_payload(&id));

        let payments = h.payments.clone();
        let paying = checkout(&id);
        let pay = tokio::spawn(async move { payments.confirm_payment(&paying).await });
        let rollback = h.rollback.clone();
        let expire =
            tokio::spawn(async move { rollback.handle_delivery(Some(JOB_SIGNATURE), &body).await });

        let paid = pay.await.unwrap();
        let outcome = expire.await.unwrap().unwrap();
        let order = h.ledger.order(&checkout(&id)).unwrap();

        match order.status {
            OrderStatus::Paid => {
                assert!(paid.is_ok());
                assert_eq!(outcome, RollbackOutcome::AlreadyPaid);
                assert_eq!(h.counters.available(&tier("VIP")), Some(3));
                assert_eq!(h.registry.len(), 2);
            }
            OrderStatus::Expired => {
                assert!(matches!(
                    paid,
                    Err(ReservationError::InvalidTransition { .. })
                ));
                assert_eq!(outcome, RollbackOutcome::RolledBack);
                assert_eq!(h.counters.available(&tier("VIP")), Some(5));
                assert!(h.registry.is_empty());
            }
            other => panic!("unexpected status {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cancel_racing_rollback_releases_once() {
    for round in 0..20 {
        let h = Harness::new();
        let id = format!("co-cancel-{round}");
        h.coordinator
            .reserve_tickets(reserve(&id, "GA", 2))
            .await
            .unwrap();
        let body = Harness::delivery_body(&h.rollback_payload(&id));

        let coordinator = h.coordinator.clone();
        let cancelling = checkout(&id);
        let cancel =
            tokio::spawn(async move { coordinator.release_on_explicit_cancel(&cancelling).await });
        let rollback = h.rollback.clone();
        let expire =
            tokio::spawn(async move { rollback.handle_delivery(Some(JOB_SIGNATURE), &body).await });

        let released = cancel.await.unwrap().unwrap();
        let outcome = expire.await.unwrap().unwrap();

        assert_ne!(released, outcome == RollbackOutcome::RolledBack);
        assert_eq!(h.counters.available(&tier("GA")), Some(2));
        assert_eq!(h.counters.release_calls(), 1);
    }
}

#[derive(Debug, Clone)]
enum Step {
    Reserve(u32),
    Cancel(usize),
    Rollback(usize),
    Pay(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u32..=4).prop_map(Step::Reserve),
        any::<usize>().prop_map(Step::Cancel),
        any::<usize>().prop_map(Step::Rollback),
        any::<usize>().prop_map(Step::Pay),
    ]
}

fn pick(held: &[String], i: usize) -> Option<String> {
    (!held.is_empty()).then(|| held[i % held.len()].clone())
}

proptest! {
    #[test]
    fn inventory_is_conserved(steps in proptest::collection::vec(step(), 1..40)) {
        let h = Harness::with_capacities(10, 2);
        let vip = tier("VIP");
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let held = rt.block_on(async {
            let mut held: Vec<String> = Vec::new();
            for (n, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Reserve(quantity) => {
                        let id = format!("co-{n}");
                        if h.coordinator.reserve_tickets(reserve(&id, "VIP", quantity)).await.is_ok() {
                            held.push(id);
                        }
                    }
                    Step::Cancel(i) => {
                        if let Some(id) = pick(&held, i) {
                            let _ = h.coordinator.release_on_explicit_cancel(&checkout(&id)).await;
                        }
                    }
                    Step::Rollback(i) => {
                        if let Some(id) = pick(&held, i) {
                            let body = Harness::delivery_body(&h.rollback_payload(&id));
                            let _ = h.rollback.handle_delivery(Some(JOB_SIGNATURE), &body).await;
                        }
                    }
                    Step::Pay(i) => {
                        if let Some(id) = pick(&held, i) {
                            let _ = h.payments.confirm_payment(&checkout(&id)).await;
                        }
                    }
                }
            }
            held
        });

        let outstanding: u32 = held
            .iter()
            .map(|id| h.ledger.order(&checkout(id)).unwrap())
            .filter(|order| matches!(order.status, OrderStatus::Pending | OrderStatus::Paid))
            .map(|order| order.quantity)
            .sum();
        let available = h.counters.available(&vip).unwrap();

        prop_assert!(outstanding <= 10);
        prop_assert_eq!(available + outstanding, 10);
    }
}

//! Shared fixtures: every service wired to in-memory doubles.

#![allow(dead_code, clippy::unwrap_used)]

use boxoffice::app::{
    AdmissionService, PaymentDependencies, PaymentService, ReservationCoordinator,
    ReservationPolicy, ReserveTickets, RollbackHandler, TicketScanner,
};
use boxoffice::config::TierCatalog;
use boxoffice::server::{AppState, ReadinessCheck};
use boxoffice_core::{BoxFuture, RollbackPayload};
use boxoffice_testing::helpers::{buyer, tier};
use boxoffice_testing::{
    FakeTicketSigner, FixedClock, InMemoryCounterStore, InMemoryOrderLedger,
    InMemoryTicketRegistry, RecordingMailer, RecordingScheduler, StaticSignatureVerifier,
    test_clock,
};
use std::sync::Arc;

/// Signature the rollback handler accepts.
pub const JOB_SIGNATURE: &str = "job-signature";
/// Signature the payment webhook accepts.
pub const PAYMENT_SIGNATURE: &str = "payment-signature";
/// Admin bearer token.
pub const ADMIN_TOKEN: &str = "admin-secret";

/// Handles to every double plus the services built on them.
pub struct Harness {
    pub counters: InMemoryCounterStore,
    pub ledger: InMemoryOrderLedger,
    pub registry: InMemoryTicketRegistry,
    pub scheduler: RecordingScheduler,
    pub mailer: RecordingMailer,
    pub clock: Arc<FixedClock>,
    pub coordinator: ReservationCoordinator,
    pub rollback: RollbackHandler,
    pub payments: PaymentService,
    pub scanner: TicketScanner,
    pub admission: AdmissionService,
}

impl Harness {
    /// Tiers `VIP` (capacity 5) and `GA` (capacity 2), initialized.
    pub fn new() -> Self {
        Self::with_capacities(5, 2)
    }

    pub fn with_capacities(vip: u32, ga: u32) -> Self {
        let counters = InMemoryCounterStore::with_tiers([(&tier("VIP"), vip), (&tier("GA"), ga)]);
        let ledger = InMemoryOrderLedger::new();
        let registry = InMemoryTicketRegistry::new();
        let scheduler = RecordingScheduler::new();
        let mailer = RecordingMailer::new();
        let clock = Arc::new(test_clock());
        let catalog = TierCatalog::parse(&format!("VIP:15000:{vip},GA:5000:{ga}")).unwrap();

        let coordinator = ReservationCoordinator::new(
            Arc::new(counters.clone()),
            Arc::new(ledger.clone()),
            Arc::new(scheduler.clone()),
            clock.clone(),
            ReservationPolicy {
                max_active_holds: 0,
                ..ReservationPolicy::default()
            },
        );
        let rollback = RollbackHandler::new(
            Arc::new(counters.clone()),
            Arc::new(ledger.clone()),
            Arc::new(StaticSignatureVerifier::new(JOB_SIGNATURE)),
            clock.clone(),
        );
        let payments = PaymentService::new(PaymentDependencies {
            ledger: Arc::new(ledger.clone()),
            counters: Arc::new(counters.clone()),
            registry: Arc::new(registry.clone()),
            signer: Arc::new(FakeTicketSigner),
            mailer: Arc::new(mailer.clone()),
            scheduler: Arc::new(scheduler.clone()),
            verifier: Arc::new(StaticSignatureVerifier::new(PAYMENT_SIGNATURE)),
            clock: clock.clone(),
        });
        let scanner = TicketScanner::new(
            Arc::new(FakeTicketSigner),
            Arc::new(registry.clone()),
            clock.clone(),
        );
        let admission = AdmissionService::new(
            Arc::new(counters.clone()),
            Arc::new(ledger.clone()),
            catalog,
        );

        Self {
            counters,
            ledger,
            registry,
            scheduler,
            mailer,
            clock,
            coordinator,
            rollback,
            payments,
            scanner,
            admission,
        }
    }

    /// Router state over the same doubles.
    pub fn state(&self) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            rollback: self.rollback.clone(),
            payments: self.payments.clone(),
            scanner: self.scanner.clone(),
            admission: self.admission.clone(),
            admin_token: Arc::from(ADMIN_TOKEN),
            readiness: Arc::new(AlwaysReady),
        }
    }

    /// The job the coordinator scheduled for `checkout_id`.
    pub fn rollback_payload(&self, checkout_id: &str) -> RollbackPayload {
        self.scheduler
            .jobs()
            .into_iter()
            .find(|job| job.payload.checkout_id.as_str() == checkout_id)
            .map(|job| job.payload)
            .unwrap()
    }

    /// Raw body the transport would deliver for `payload`.
    pub fn delivery_body(payload: &RollbackPayload) -> Vec<u8> {
        serde_json::to_vec(payload).unwrap()
    }
}

/// A reservation request for `tier_name`.
pub fn reserve(checkout_id: &str, tier_name: &str, quantity: u32) -> ReserveTickets {
    ReserveTickets {
        checkout_id: Some(boxoffice_testing::helpers::checkout(checkout_id)),
        tier: tier(tier_name),
        quantity,
        buyer: buyer("Ada Lovelace"),
        client_key: None,
    }
}

/// Readiness probe that always passes.
pub struct AlwaysReady;

impl ReadinessCheck for AlwaysReady {
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }
}

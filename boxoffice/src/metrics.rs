//! Business metrics for the box office.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_reservations_total{outcome}` - Reservation attempts by outcome
//! - `boxoffice_tickets_held_total{tier}` - Tickets placed on hold
//! - `boxoffice_compensations_total{result}` - Counter releases after a failed ledger write
//! - `boxoffice_releases_total{tier}` - Explicit buyer releases
//! - `boxoffice_rollbacks_total{outcome}` - Rollback deliveries by outcome
//! - `boxoffice_rollback_release_failures_total` - Expired orders whose release failed
//! - `boxoffice_scheduler_failures_total` - Rollback jobs that could not be scheduled
//! - `boxoffice_payments_total{status}` - Payment confirmations by result
//! - `boxoffice_tickets_issued_total` - Tickets minted
//! - `boxoffice_ticket_scans_total{result}` - Door scans by result
//!
//! ## Gauges
//! - `boxoffice_tickets_available{tier}` - Counter store availability after each change

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "boxoffice_reservations_total",
        "Reservation attempts by outcome (created, sold_out, rejected, failed)"
    );
    describe_counter!(
        "boxoffice_tickets_held_total",
        "Tickets placed on hold by tier"
    );
    describe_counter!(
        "boxoffice_compensations_total",
        "Counter releases after a failed ledger write (succeeded, failed)"
    );
    describe_counter!(
        "boxoffice_releases_total",
        "Holds released explicitly by the buyer"
    );
    describe_counter!(
        "boxoffice_rollbacks_total",
        "Rollback deliveries by outcome"
    );
    describe_counter!(
        "boxoffice_rollback_release_failures_total",
        "Orders expired by a rollback whose inventory release failed"
    );
    describe_counter!(
        "boxoffice_scheduler_failures_total",
        "Rollback jobs that could not be scheduled"
    );
    describe_counter!(
        "boxoffice_payments_total",
        "Payment confirmations by status (confirmed, rejected)"
    );
    describe_counter!(
        "boxoffice_tickets_issued_total",
        "Total number of tickets issued"
    );
    describe_counter!(
        "boxoffice_ticket_scans_total",
        "Door scans by result"
    );
    describe_gauge!(
        "boxoffice_tickets_available",
        "Counter store availability by tier"
    );

    tracing::info!("Business metrics registered");
}

/// Install the Prometheus recorder and its scrape listener.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder is already installed or the listener
/// cannot be created.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Metrics server started - available at http://{addr}/metrics");
    Ok(())
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a successful hold.
pub fn record_reservation_created(tier: &str, quantity: u32, available: u32) {
    metrics::counter!("boxoffice_reservations_total", "outcome" => "created").increment(1);
    metrics::counter!("boxoffice_tickets_held_total", "tier" => tier.to_string())
        .increment(u64::from(quantity));
    record_available(tier, available);
}

/// Record a reservation that did not produce a hold.
///
/// # Arguments
///
/// * `outcome` - `sold_out`, `rejected` or `failed`
pub fn record_reservation_rejected(outcome: &'static str) {
    metrics::counter!("boxoffice_reservations_total", "outcome" => outcome).increment(1);
}

/// Record a compensating release after a failed ledger write.
pub fn record_compensation(succeeded: bool) {
    let result = if succeeded { "succeeded" } else { "failed" };
    metrics::counter!("boxoffice_compensations_total", "result" => result).increment(1);
}

/// Record an explicit buyer release.
pub fn record_release(tier: &str, available: u32) {
    metrics::counter!("boxoffice_releases_total", "tier" => tier.to_string()).increment(1);
    record_available(tier, available);
}

/// Record a rollback delivery.
pub fn record_rollback(outcome: &'static str) {
    metrics::counter!("boxoffice_rollbacks_total", "outcome" => outcome).increment(1);
}

/// Record an expired order whose inventory could not be released.
pub fn record_rollback_release_failure() {
    metrics::counter!("boxoffice_rollback_release_failures_total").increment(1);
}

/// Record a rollback job that could not be scheduled.
pub fn record_scheduler_failure() {
    metrics::counter!("boxoffice_scheduler_failures_total").increment(1);
}

/// Record a payment confirmation.
pub fn record_payment(status: &'static str) {
    metrics::counter!("boxoffice_payments_total", "status" => status).increment(1);
}

/// Record newly minted tickets.
pub fn record_tickets_issued(count: usize) {
    metrics::counter!("boxoffice_tickets_issued_total").increment(count as u64);
}

/// Record a door scan.
pub fn record_scan(result: &'static str) {
    metrics::counter!("boxoffice_ticket_scans_total", "result" => result).increment(1);
}

/// Record counter store availability for a tier.
pub fn record_available(tier: &str, available: u32) {
    metrics::gauge!("boxoffice_tickets_available", "tier" => tier.to_string())
        .set(f64::from(available));
}

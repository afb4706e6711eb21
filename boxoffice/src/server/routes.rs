//! Route table.

use crate::api::{admin, jobs, payments, reservations, tickets, tiers};
use crate::server::health::{health_check, readiness_check};
use crate::server::middleware::correlation_id_layer;
use crate::server::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// ```text
/// GET  /health
/// GET  /ready
/// GET  /api/tiers
/// POST /api/reservations
/// GET  /api/reservations/:checkout_id
/// POST /api/reservations/:checkout_id/release
/// POST /api/jobs/rollback                      (X-Job-Signature)
/// POST /api/payments/confirm                   (X-Payment-Signature)
/// POST /api/tickets/scan                       (admin token)
/// POST /api/admin/inventory                    (admin token)
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/tiers", get(tiers::list_tiers))
        .route("/api/reservations", post(reservations::create_reservation))
        .route(
            "/api/reservations/:checkout_id",
            get(reservations::get_reservation),
        )
        .route(
            "/api/reservations/:checkout_id/release",
            post(reservations::release_reservation),
        )
        .route("/api/jobs/rollback", post(jobs::rollback))
        .route("/api/payments/confirm", post(payments::confirm_payment))
        .route("/api/tickets/scan", post(tickets::scan_ticket))
        .route("/api/admin/inventory", post(admin::inventory))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

//! Application state shared by all handlers.

use crate::app::{
    AdmissionService, PaymentService, ReservationCoordinator, RollbackHandler, TicketScanner,
};
use crate::server::health::ReadinessCheck;
use std::sync::Arc;

/// Services and settings handed to every handler.
///
/// Cheap to clone: every field is an `Arc` or a service holding `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Reserve, release and order reads
    pub coordinator: ReservationCoordinator,
    /// Rollback webhook processing
    pub rollback: RollbackHandler,
    /// Payment webhook processing
    pub payments: PaymentService,
    /// Door scans
    pub scanner: TicketScanner,
    /// Tier status and admin commands
    pub admission: AdmissionService,
    /// Bearer token for admin routes
    pub admin_token: Arc<str>,
    /// Backend probe for `/ready`
    pub readiness: Arc<dyn ReadinessCheck>,
}

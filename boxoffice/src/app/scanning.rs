//! Door scanning: verify a QR payload and consume the ticket.

use crate::error::ReservationError;
use crate::metrics;
use boxoffice_core::{Clock, ScanOutcome, TicketRegistry, TicketSigner};
use std::sync::Arc;

/// Validates tickets presented at the door.
#[derive(Clone)]
pub struct TicketScanner {
    signer: Arc<dyn TicketSigner>,
    registry: Arc<dyn TicketRegistry>,
    clock: Arc<dyn Clock>,
}

impl TicketScanner {
    /// Create the scanner.
    #[must_use]
    pub fn new(
        signer: Arc<dyn TicketSigner>,
        registry: Arc<dyn TicketRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            registry,
            clock,
        }
    }

    /// Scan a QR payload.
    ///
    /// A ticket admits exactly once; later scans report when it was first used.
    ///
    /// # Errors
    ///
    /// - `Transient`: ticket registry unavailable
    pub async fn scan(&self, payload: &str) -> Result<ScanOutcome, ReservationError> {
        let Some(claims) = self.signer.verify(payload) else {
            metrics::record_scan("invalid");
            tracing::warn!("Ticket scan rejected: payload signature invalid");
            return Ok(ScanOutcome::Invalid);
        };

        let outcome = self
            .registry
            .mark_used(claims.ticket_id, self.clock.now())
            .await?;

        let result = match &outcome {
            ScanOutcome::Admitted { .. } => "admitted",
            ScanOutcome::AlreadyScanned { .. } => "already_scanned",
            ScanOutcome::Void => "void",
            ScanOutcome::Invalid => "invalid",
            ScanOutcome::Unknown => "unknown",
        };
        metrics::record_scan(result);
        tracing::info!(
            ticket_id = %claims.ticket_id,
            tier = %claims.tier,
            result,
            "Ticket scanned"
        );

        Ok(outcome)
    }
}

//! Post-payment ticket contracts: issuance, QR signing, delivery and door scans.

use crate::ledger::LedgerError;
use crate::types::{CheckoutId, Order, Ticket, TicketId, TierId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims embedded in a ticket's QR payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Ticket identifier
    pub ticket_id: TicketId,
    /// Holder name
    pub buyer_name: String,
    /// Tier of the ticket
    pub tier: TierId,
}

/// QR payload signing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ticket signing failed: {0}")]
pub struct SignerError(pub String);

/// Signs and verifies QR payloads.
pub trait TicketSigner: Send + Sync {
    /// Produce the signed payload encoded into the ticket's QR code.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] if the claims cannot be encoded.
    fn sign(&self, claims: &TicketClaims) -> Result<String, SignerError>;

    /// Decode a payload, returning its claims only if the signature is valid.
    fn verify(&self, payload: &str) -> Option<TicketClaims>;
}

/// Ticket email delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ticket email failed: {0}")]
pub struct MailerError(pub String);

/// The "send ticket email" capability. Template rendering lives elsewhere.
pub trait TicketMailer: Send + Sync {
    /// Send the issued tickets of `order` to its buyer.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError`] if delivery fails.
    fn send_tickets<'a>(
        &'a self,
        order: &'a Order,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, Result<(), MailerError>>;
}

/// Result of presenting a ticket at the door.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// First scan: the ticket is now `used`
    Admitted {
        /// The ticket after the transition
        ticket: Ticket,
    },
    /// Ticket was scanned before; nothing changed
    AlreadyScanned {
        /// When the first scan happened
        scanned_at: DateTime<Utc>,
    },
    /// Ticket was voided by an operator
    Void,
    /// Payload signature did not verify
    Invalid,
    /// No ticket with this id
    Unknown,
}

/// Storage for issued tickets.
pub trait TicketRegistry: Send + Sync {
    /// Persist tickets for a paid order.
    ///
    /// Idempotent per order: if tickets already exist for `checkout_id`, the
    /// existing set is returned and `tickets` is discarded.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn issue_for_order(
        &self,
        checkout_id: &CheckoutId,
        tickets: Vec<Ticket>,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>>;

    /// Tickets issued for an order, oldest first.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn list_for_order(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>>;

    /// Atomically move an `active` ticket to `used`.
    ///
    /// # Errors
    ///
    /// - `Database`: store unavailable
    fn mark_used(&self, ticket_id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, Result<ScanOutcome, LedgerError>>;
}

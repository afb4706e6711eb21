//! Domain types for the Box Office reservation system.
//!
//! Identifiers, the order state machine, tier inventory snapshots and issued tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Maximum length accepted for externally supplied identifiers.
const MAX_ID_LEN: usize = 128;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidId {
    /// Identifier was empty or whitespace.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier was rejected
        kind: &'static str,
    },
    /// Identifier exceeded the maximum length.
    #[error("{kind} must be at most {max} characters")]
    TooLong {
        /// Which identifier was rejected
        kind: &'static str,
        /// Maximum allowed length
        max: usize,
    },
    /// Identifier contained characters outside `[A-Za-z0-9_-]`.
    #[error("{kind} may only contain letters, digits, '-' and '_'")]
    InvalidCharacters {
        /// Which identifier was rejected
        kind: &'static str,
    },
}

fn validate_id(kind: &'static str, raw: &str) -> Result<(), InvalidId> {
    if raw.trim().is_empty() {
        return Err(InvalidId::Empty { kind });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(InvalidId::TooLong {
            kind,
            max: MAX_ID_LEN,
        });
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(InvalidId::InvalidCharacters { kind });
    }
    Ok(())
}

/// Stable identifier of a ticket tier (e.g. `"VIP"`, `"GA"`).
///
/// Tier ids are embedded in counter keys, so they are restricted to
/// `[A-Za-z0-9_-]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TierId(String);

impl TierId {
    /// Parse and validate a tier id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] if the id is empty, too long, or has invalid characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        validate_id("tier", &raw)?;
        Ok(Self(raw))
    }

    /// Get the tier id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TierId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TierId> for String {
    fn from(value: TierId) -> Self {
        value.0
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique identifier of one checkout attempt.
///
/// Either supplied by the client (idempotent retries) or generated by the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckoutId(String);

impl CheckoutId {
    /// Generate a fresh server-side checkout id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("co_{}", Uuid::new_v4().simple()))
    }

    /// Parse and validate a client-supplied checkout id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] if the id is empty, too long, or has invalid characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        validate_id("checkout id", &raw)?;
        Ok(Self(raw))
    }

    /// Get the checkout id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CheckoutId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CheckoutId> for String {
    fn from(value: CheckoutId) -> Self {
        value.0
    }
}

impl fmt::Display for CheckoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for an issued ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Buyer
// ============================================================================

/// Identity of the person buying tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    /// Full name printed on the tickets
    pub name: String,
    /// Email the tickets are sent to
    pub email: String,
    /// Optional contact phone
    pub phone: Option<String>,
}

// ============================================================================
// Orders
// ============================================================================

/// Error returned when a persisted status string is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    /// Which status enum was being parsed
    pub kind: &'static str,
    /// The rejected value
    pub value: String,
}

/// Lifecycle status of an order.
///
/// ```text
/// pending ──► paid
///    │
///    ├──────► cancelled   (explicit release)
///    │
///    └──────► expired     (rollback job, fenced)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Inventory held, waiting for payment
    Pending,
    /// Payment confirmed by the checkout provider
    Paid,
    /// Released explicitly by the buyer
    Cancelled,
    /// Released by the rollback job after the hold window
    Expired,
}

impl OrderStatus {
    /// Convert status to its persisted string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse status from its persisted string representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatus`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(UnknownStatus {
                kind: "order",
                value: s.to_string(),
            }),
        }
    }

    /// Terminal states never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkout attempt, as recorded in the order ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique checkout identifier
    pub checkout_id: CheckoutId,
    /// Tier the tickets were reserved from
    pub tier: TierId,
    /// Number of tickets held
    pub quantity: u32,
    /// Current lifecycle status
    pub status: OrderStatus,
    /// Buyer identity
    pub buyer: BuyerInfo,
    /// Session id or network address that created the hold
    pub client_key: Option<String>,
    /// Identifier of the scheduled rollback job, once known
    pub rollback_job_id: Option<String>,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// When payment was confirmed
    pub paid_at: Option<DateTime<Utc>>,
    /// When the buyer released the hold
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the hold expired
    pub expired_at: Option<DateTime<Utc>>,
    /// Idempotency fence set exactly once by the rollback transition
    pub rollback_executed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Whether the order still holds inventory without confirmed payment.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }

    /// Whether the rollback transition already ran for this order.
    #[must_use]
    pub const fn rollback_executed(&self) -> bool {
        self.rollback_executed_at.is_some()
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// Counter snapshot for one tier.
///
/// Invariant: `0 <= available <= total_capacity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInventory {
    /// Tier identifier
    pub tier: TierId,
    /// Total sellable capacity
    pub total_capacity: u32,
    /// Tickets currently available for new holds
    pub available: u32,
}

impl TierInventory {
    /// Tickets currently held or sold according to the counter.
    #[must_use]
    pub const fn committed(&self) -> u32 {
        self.total_capacity.saturating_sub(self.available)
    }
}

/// Side-storage entry kept next to the counters while a hold is pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMetadata {
    /// Checkout the hold belongs to
    pub checkout_id: CheckoutId,
    /// Tier held
    pub tier: TierId,
    /// Quantity held
    pub quantity: u32,
    /// Client that created the hold
    pub client_key: Option<String>,
    /// When the hold was taken
    pub reserved_at: DateTime<Utc>,
    /// When the rollback job is due
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Rollback
// ============================================================================

/// Result reported back to the job transport for one rollback delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Order expired by this delivery and its inventory released
    RolledBack,
    /// Order was paid; nothing released
    AlreadyPaid,
    /// A previous delivery already expired the order
    AlreadyRolledBack,
    /// Order is expired but the fence was never set by a rollback
    AlreadyExpired,
    /// Buyer released the hold explicitly; inventory already returned
    AlreadyCancelled,
    /// Ledger has no such checkout; nothing released
    NoOrder,
}

impl RollbackOutcome {
    /// Wire representation used in webhook responses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RolledBack => "rolled_back",
            Self::AlreadyPaid => "already_paid",
            Self::AlreadyRolledBack => "already_rolled_back",
            Self::AlreadyExpired => "already_expired",
            Self::AlreadyCancelled => "already_cancelled",
            Self::NoOrder => "no_order",
        }
    }

    /// Outcome describing an order that is already terminal.
    ///
    /// Returns `None` for pending orders, which still need the ledger gate.
    #[must_use]
    pub const fn for_terminal(order: &Order) -> Option<Self> {
        match order.status {
            OrderStatus::Pending => None,
            OrderStatus::Paid => Some(Self::AlreadyPaid),
            OrderStatus::Cancelled => Some(Self::AlreadyCancelled),
            OrderStatus::Expired if order.rollback_executed_at.is_some() => {
                Some(Self::AlreadyRolledBack)
            }
            OrderStatus::Expired => Some(Self::AlreadyExpired),
        }
    }
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Admission status of an issued ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Valid for entry
    Active,
    /// Already scanned at the door
    Used,
    /// Invalidated by an operator
    Void,
}

impl TicketStatus {
    /// Convert status to its persisted string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Void => "void",
        }
    }

    /// Parse status from its persisted string representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatus`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "void" => Ok(Self::Void),
            _ => Err(UnknownStatus {
                kind: "ticket",
                value: s.to_string(),
            }),
        }
    }
}

/// One admitted unit of a paid order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier (encoded in the QR payload)
    pub id: TicketId,
    /// Order the ticket was issued for
    pub checkout_id: CheckoutId,
    /// Tier of the ticket
    pub tier: TierId,
    /// Admission status
    pub status: TicketStatus,
    /// Name of the ticket holder
    pub buyer_name: String,
    /// Email the ticket was sent to
    pub buyer_email: String,
    /// Signed QR payload presented at the door
    pub qr_payload: String,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
    /// When the ticket was scanned, if ever
    pub scanned_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tier_id_rejects_key_separators() {
        assert!(TierId::parse("VIP").is_ok());
        assert!(TierId::parse("early_bird-2").is_ok());
        assert_eq!(
            TierId::parse("vip:available"),
            Err(InvalidId::InvalidCharacters { kind: "tier" })
        );
        assert_eq!(TierId::parse("  "), Err(InvalidId::Empty { kind: "tier" }));
    }

    #[test]
    fn checkout_id_generate_is_valid() {
        let id = CheckoutId::generate();
        assert!(CheckoutId::parse(id.as_str()).is_ok());
        assert!(id.as_str().starts_with("co_"));
    }

    #[test]
    fn checkout_id_deserialize_validates() {
        let ok: Result<CheckoutId, _> = serde_json::from_str("\"abc-123\"");
        assert!(ok.is_ok());
        let bad: Result<CheckoutId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn order_status_round_trips_through_storage_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::parse("refunded").is_err());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
    }

    #[test]
    fn rollback_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&RollbackOutcome::AlreadyRolledBack).unwrap();
        assert_eq!(json, "\"already_rolled_back\"");
        assert_eq!(RollbackOutcome::NoOrder.as_str(), "no_order");
    }

    proptest! {
        #[test]
        fn committed_never_exceeds_capacity(total in 0u32..10_000, available in 0u32..10_000) {
            let inv = TierInventory {
                tier: TierId::parse("GA").unwrap(),
                total_capacity: total,
                available: available.min(total),
            };
            prop_assert!(inv.committed() <= inv.total_capacity);
        }
    }
}

//! `PostgreSQL` ticket registry.

use crate::db_error;
use boxoffice_core::{
    BoxFuture, CheckoutId, LedgerError, ScanOutcome, Ticket, TicketId, TicketRegistry,
    TicketStatus, TierId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const TICKET_COLUMNS: &str =
    "id, checkout_id, tier, status, buyer_name, buyer_email, qr_payload, issued_at, scanned_at";

/// `PostgreSQL`-backed ticket registry.
///
/// Shares the pool (and the `orders` table it references) with
/// [`PostgresOrderLedger`](crate::PostgresOrderLedger).
#[derive(Clone, Debug)]
pub struct PostgresTicketRegistry {
    pool: PgPool,
}

impl PostgresTicketRegistry {
    /// Create a registry over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list(&self, checkout_id: &CheckoutId) -> Result<Vec<Ticket>, LedgerError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE checkout_id = $1 ORDER BY issued_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(checkout_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_ticket).collect()
    }

    async fn issue(&self, checkout_id: CheckoutId, tickets: Vec<Ticket>) -> Result<Vec<Ticket>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Lock the order row so concurrent confirmations issue one set.
        let locked: Option<(String,)> =
            sqlx::query_as("SELECT checkout_id FROM orders WHERE checkout_id = $1 FOR UPDATE")
                .bind(checkout_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        if locked.is_none() {
            return Err(LedgerError::NotFound(checkout_id));
        }

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tickets WHERE checkout_id = $1")
            .bind(checkout_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        if existing == 0 {
            for ticket in &tickets {
                sqlx::query(
                    r"
                    INSERT INTO tickets (
                        id, checkout_id, tier, status, buyer_name, buyer_email,
                        qr_payload, issued_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ",
                )
                .bind(ticket.id.as_uuid())
                .bind(ticket.checkout_id.as_str())
                .bind(ticket.tier.as_str())
                .bind(ticket.status.as_str())
                .bind(&ticket.buyer_name)
                .bind(&ticket.buyer_email)
                .bind(&ticket.qr_payload)
                .bind(ticket.issued_at)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            }
            tracing::info!(checkout_id = %checkout_id, count = tickets.len(), "Tickets issued");
            metrics::counter!("tickets.issued").increment(tickets.len() as u64);
        }

        tx.commit().await.map_err(db_error)?;
        self.list(&checkout_id).await
    }

    async fn scan(&self, ticket_id: TicketId, at: DateTime<Utc>) -> Result<ScanOutcome, LedgerError> {
        let sql = format!(
            "UPDATE tickets SET status = 'used', scanned_at = $2
            WHERE id = $1 AND status = 'active'
            RETURNING {TICKET_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(ticket_id.as_uuid())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = updated {
            return Ok(ScanOutcome::Admitted {
                ticket: row_to_ticket(&row)?,
            });
        }

        let current: Option<(String, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT status, scanned_at FROM tickets WHERE id = $1")
                .bind(ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        let Some((status, scanned_at)) = current else {
            return Ok(ScanOutcome::Unknown);
        };
        let status = TicketStatus::parse(&status)
            .map_err(|e| LedgerError::Database(format!("corrupt ticket row: {e}")))?;

        Ok(match status {
            TicketStatus::Void => ScanOutcome::Void,
            TicketStatus::Used | TicketStatus::Active => ScanOutcome::AlreadyScanned {
                scanned_at: scanned_at.unwrap_or(at),
            },
        })
    }
}

impl TicketRegistry for PostgresTicketRegistry {
    fn issue_for_order(
        &self,
        checkout_id: &CheckoutId,
        tickets: Vec<Ticket>,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>> {
        Box::pin(self.issue(checkout_id.clone(), tickets))
    }

    fn list_for_order(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Vec<Ticket>, LedgerError>> {
        let checkout_id = checkout_id.clone();
        Box::pin(async move { self.list(&checkout_id).await })
    }

    fn mark_used(&self, ticket_id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, Result<ScanOutcome, LedgerError>> {
        Box::pin(self.scan(ticket_id, at))
    }
}

fn row_to_ticket(row: &PgRow) -> Result<Ticket, LedgerError> {
    let corrupt = |e: &dyn std::fmt::Display| LedgerError::Database(format!("corrupt ticket row: {e}"));

    let id: Uuid = row.try_get("id").map_err(db_error)?;
    let checkout_id: String = row.try_get("checkout_id").map_err(db_error)?;
    let tier: String = row.try_get("tier").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;

    Ok(Ticket {
        id: TicketId::from_uuid(id),
        checkout_id: CheckoutId::parse(checkout_id).map_err(|e| corrupt(&e))?,
        tier: TierId::parse(tier).map_err(|e| corrupt(&e))?,
        status: TicketStatus::parse(&status).map_err(|e| corrupt(&e))?,
        buyer_name: row.try_get("buyer_name").map_err(db_error)?,
        buyer_email: row.try_get("buyer_email").map_err(db_error)?,
        qr_payload: row.try_get("qr_payload").map_err(db_error)?,
        issued_at: row.try_get("issued_at").map_err(db_error)?,
        scanned_at: row.try_get("scanned_at").map_err(db_error)?,
    })
}

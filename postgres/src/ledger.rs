//! `PostgreSQL` implementation of the order ledger.
//!
//! Every transition out of `pending` is a single conditional statement:
//!
//! ```sql
//! UPDATE orders SET status = ... WHERE checkout_id = $1 AND status = 'pending' RETURNING ...
//! ```
//!
//! Row-level locking inside `PostgreSQL` serializes racing callers, so exactly one
//! of them sees a returned row. The loser re-reads the row to report the winner.

use crate::db_error;
use boxoffice_core::{
    BoxFuture, BuyerInfo, CheckoutId, CreateOutcome, ExpiryTransition, JobId, LedgerError,
    NewOrder, Order, OrderLedger, OrderStatus, TierId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

const ORDER_COLUMNS: &str = "checkout_id, tier, quantity, status, buyer_name, buyer_email, \
     buyer_phone, client_key, rollback_job_id, created_at, updated_at, paid_at, \
     cancelled_at, expired_at, rollback_executed_at";

/// `PostgreSQL`-backed order ledger.
///
/// # Example
///
/// ```no_run
/// use boxoffice_postgres::PostgresOrderLedger;
/// use boxoffice_core::{CheckoutId, OrderLedger};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PostgresOrderLedger::new(pool);
/// let order = ledger.get_by_checkout_id(&CheckoutId::parse("co-1")?).await?;
/// println!("{} is {}", order.checkout_id, order.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresOrderLedger {
    pool: PgPool,
}

impl PostgresOrderLedger {
    /// Create a ledger over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and create a ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self { pool })
    }

    /// The underlying pool, shared with the ticket registry and readiness checks.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(&self, checkout_id: &CheckoutId) -> Result<Option<Order>, LedgerError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE checkout_id = $1");
        let row = sqlx::query(&sql)
            .bind(checkout_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn fetch_existing(&self, checkout_id: &CheckoutId) -> Result<Order, LedgerError> {
        self.fetch(checkout_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(checkout_id.clone()))
    }

    async fn insert_pending(&self, new: NewOrder) -> Result<CreateOutcome, LedgerError> {
        let quantity = i32::try_from(new.quantity)
            .map_err(|_| LedgerError::Database(format!("quantity out of range: {}", new.quantity)))?;

        let sql = format!(
            "INSERT INTO orders (
                checkout_id, tier, quantity, status, buyer_name, buyer_email,
                buyer_phone, client_key, created_at, updated_at
            ) VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $8)
            ON CONFLICT (checkout_id) DO NOTHING
            RETURNING {ORDER_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(new.checkout_id.as_str())
            .bind(new.tier.as_str())
            .bind(quantity)
            .bind(&new.buyer.name)
            .bind(&new.buyer.email)
            .bind(new.buyer.phone.as_deref())
            .bind(new.client_key.as_deref())
            .bind(new.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = inserted {
            let order = row_to_order(&row)?;
            tracing::debug!(
                checkout_id = %order.checkout_id,
                tier = %order.tier,
                quantity = order.quantity,
                "Pending order created"
            );
            return Ok(CreateOutcome {
                order,
                created: true,
            });
        }

        // Conflict: a retry with the same parameters is a success.
        let existing = self.fetch_existing(&new.checkout_id).await?;
        if new.matches(&existing) {
            tracing::debug!(checkout_id = %existing.checkout_id, "Pending order already exists");
            Ok(CreateOutcome {
                order: existing,
                created: false,
            })
        } else {
            Err(LedgerError::DuplicateCheckoutId(new.checkout_id))
        }
    }

    async fn transition(
        &self,
        checkout_id: &CheckoutId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, LedgerError> {
        let timestamp_column = match to {
            OrderStatus::Paid => "paid_at",
            OrderStatus::Cancelled => "cancelled_at",
            OrderStatus::Expired => "expired_at",
            OrderStatus::Pending => {
                return Err(LedgerError::InvalidTransition {
                    checkout_id: checkout_id.clone(),
                    from: OrderStatus::Pending,
                    to,
                });
            }
        };

        let sql = format!(
            "UPDATE orders
            SET status = $2, {timestamp_column} = $3, updated_at = $3
            WHERE checkout_id = $1 AND status = 'pending'
            RETURNING {ORDER_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(checkout_id.as_str())
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = updated {
            let order = row_to_order(&row)?;
            tracing::info!(checkout_id = %checkout_id, status = to.as_str(), "Order transitioned");
            metrics::counter!("ledger.transitions", "to" => to.as_str()).increment(1);
            return Ok(order);
        }

        let current = self.fetch_existing(checkout_id).await?;
        if current.status == to && to == OrderStatus::Paid {
            return Ok(current);
        }
        Err(LedgerError::InvalidTransition {
            checkout_id: checkout_id.clone(),
            from: current.status,
            to,
        })
    }
}

impl OrderLedger for PostgresOrderLedger {
    fn create_pending(&self, order: NewOrder) -> BoxFuture<'_, Result<CreateOutcome, LedgerError>> {
        Box::pin(self.insert_pending(order))
    }

    fn get_by_checkout_id(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let checkout_id = checkout_id.clone();
        Box::pin(async move { self.fetch_existing(&checkout_id).await })
    }

    fn mark_paid(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let checkout_id = checkout_id.clone();
        Box::pin(async move { self.transition(&checkout_id, OrderStatus::Paid, at).await })
    }

    fn mark_cancelled(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Order, LedgerError>> {
        let checkout_id = checkout_id.clone();
        Box::pin(async move { self.transition(&checkout_id, OrderStatus::Cancelled, at).await })
    }

    fn mark_expired_if_pending_and_not_rolled_back(
        &self,
        checkout_id: &CheckoutId,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ExpiryTransition, LedgerError>> {
        let checkout_id = checkout_id.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = 'expired',
                    expired_at = $2,
                    rollback_executed_at = $2,
                    updated_at = $2
                WHERE checkout_id = $1
                  AND status = 'pending'
                  AND rollback_executed_at IS NULL
                ",
            )
            .bind(checkout_id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            let transitioned = result.rows_affected() == 1;
            metrics::counter!(
                "ledger.rollback_gate",
                "transitioned" => if transitioned { "true" } else { "false" }
            )
            .increment(1);

            Ok(ExpiryTransition { transitioned })
        })
    }

    fn record_rollback_job(
        &self,
        checkout_id: &CheckoutId,
        job_id: &JobId,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let checkout_id = checkout_id.clone();
        let job_id = job_id.clone();
        Box::pin(async move {
            let result = sqlx::query("UPDATE orders SET rollback_job_id = $2 WHERE checkout_id = $1")
                .bind(checkout_id.as_str())
                .bind(job_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::NotFound(checkout_id));
            }
            Ok(())
        })
    }

    fn count_active_holds(&self, client_key: &str) -> BoxFuture<'_, Result<u32, LedgerError>> {
        let client_key = client_key.to_string();
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM orders
                WHERE client_key = $1 AND status = 'pending'
                ",
            )
            .bind(&client_key)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
    }

    fn sold_by_tier(&self) -> BoxFuture<'_, Result<BTreeMap<TierId, u64>, LedgerError>> {
        Box::pin(async move {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                r"
                SELECT tier, COALESCE(SUM(quantity), 0)::BIGINT
                FROM orders
                WHERE status = 'paid'
                GROUP BY tier
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.into_iter()
                .map(|(tier, sold)| {
                    let tier = TierId::parse(tier)
                        .map_err(|e| LedgerError::Database(format!("corrupt tier id: {e}")))?;
                    Ok((tier, u64::try_from(sold).unwrap_or(0)))
                })
                .collect::<Result<BTreeMap<_, _>, LedgerError>>()
        })
    }
}

/// Convert a database row to an [`Order`].
fn row_to_order(row: &PgRow) -> Result<Order, LedgerError> {
    let corrupt = |e: &dyn std::fmt::Display| LedgerError::Database(format!("corrupt order row: {e}"));

    let checkout_id: String = row.try_get("checkout_id").map_err(db_error)?;
    let tier: String = row.try_get("tier").map_err(db_error)?;
    let quantity: i32 = row.try_get("quantity").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;

    Ok(Order {
        checkout_id: CheckoutId::parse(checkout_id).map_err(|e| corrupt(&e))?,
        tier: TierId::parse(tier).map_err(|e| corrupt(&e))?,
        quantity: u32::try_from(quantity).map_err(|e| corrupt(&e))?,
        status: OrderStatus::parse(&status).map_err(|e| corrupt(&e))?,
        buyer: BuyerInfo {
            name: row.try_get("buyer_name").map_err(db_error)?,
            email: row.try_get("buyer_email").map_err(db_error)?,
            phone: row.try_get("buyer_phone").map_err(db_error)?,
        },
        client_key: row.try_get("client_key").map_err(db_error)?,
        rollback_job_id: row.try_get("rollback_job_id").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        paid_at: row.try_get("paid_at").map_err(db_error)?,
        cancelled_at: row.try_get("cancelled_at").map_err(db_error)?,
        expired_at: row.try_get("expired_at").map_err(db_error)?,
        rollback_executed_at: row.try_get("rollback_executed_at").map_err(db_error)?,
    })
}

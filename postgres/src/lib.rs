//! `PostgreSQL` order ledger and ticket registry for Box Office.
//!
//! This crate provides the durable half of the reservation system:
//!
//! - [`PostgresOrderLedger`]: implements [`boxoffice_core::OrderLedger`] with a
//!   primary key on `checkout_id` and conditional `UPDATE ... RETURNING` transitions
//! - [`PostgresTicketRegistry`]: implements [`boxoffice_core::TicketRegistry`]
//! - [`run_migrations`]: embedded schema migrations
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_postgres::{PostgresOrderLedger, run_migrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/boxoffice").await?;
//! run_migrations(&pool).await?;
//! let ledger = PostgresOrderLedger::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use boxoffice_core::LedgerError;

pub mod ledger;
pub mod tickets;

pub use ledger::PostgresOrderLedger;
pub use tickets::PostgresTicketRegistry;

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] if a migration fails.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), LedgerError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| LedgerError::Database(format!("migration failed: {e}")))?;

    tracing::info!("Database migrations applied");
    Ok(())
}

#[allow(clippy::needless_pass_by_value)] // Used as `map_err(db_error)`
pub(crate) fn db_error(error: sqlx::Error) -> LedgerError {
    LedgerError::Database(error.to_string())
}

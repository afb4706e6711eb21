//! # Box Office
//!
//! Ticket reservations with a hard no-oversell guarantee and exactly-once
//! deferred rollback.
//!
//! ## Flow
//!
//! ```text
//! POST /api/reservations
//!   └─► counter reserve (atomic) ─► ledger pending ─► schedule rollback job
//!
//! job transport, after the hold window
//!   └─► POST /api/jobs/rollback ─► fenced pending → expired ─► counter release
//!
//! payment provider
//!   └─► POST /api/payments/confirm ─► pending → paid ─► tickets + email
//! ```
//!
//! Counters live in `Redis` (`boxoffice-redis`), orders and tickets in
//! `PostgreSQL` (`boxoffice-postgres`). The rollback delay belongs to an external
//! at-least-once scheduler reached over HTTP ([`transport::HttpJobScheduler`]);
//! every delivery is idempotent thanks to the ledger's fenced transition.
//!
//! ## Modules
//!
//! - [`app`]: reservation, rollback, admission, payment and scan services
//! - [`server`] and [`api`]: axum router, handlers and error mapping
//! - [`config`]: environment configuration
//! - [`signing`], [`transport`], [`mailer`]: adapters for the core traits
//! - [`metrics`]: Prometheus business metrics

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod mailer;
pub mod metrics;
pub mod server;
pub mod signing;
pub mod transport;

pub use config::Config;
pub use error::ReservationError;

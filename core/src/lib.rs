//! # Box Office Core
//!
//! Domain types and store contracts for the Box Office ticket reservation system.
//!
//! The system sells a finite inventory of tickets per tier under concurrent demand.
//! Every cross-request guarantee lives behind one of the traits in this crate:
//!
//! - [`counter::CounterStore`]: atomic per-tier counters used for admission control
//! - [`ledger::OrderLedger`]: durable order records with conditional state transitions
//! - [`scheduler::JobScheduler`] / [`scheduler::SignatureVerifier`]: the deferred
//!   rollback transport
//! - [`tickets::TicketRegistry`], [`tickets::TicketSigner`], [`tickets::TicketMailer`]:
//!   post-payment ticket issuance
//!
//! ## Architecture
//!
//! ```text
//!  reserve ──► CounterStore (atomic decrement)
//!     │
//!     ├──► OrderLedger (pending row, unique checkout id)
//!     │
//!     └──► JobScheduler (rollback after hold window)
//!                 │
//!                 ▼
//!     rollback ──► OrderLedger (pending → expired, fenced) ──► CounterStore (release)
//! ```
//!
//! Application code never reads a counter and writes it back; it only calls the
//! conditional primitives exposed by the traits. Implementations live in
//! `boxoffice-redis`, `boxoffice-postgres` and `boxoffice-testing`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use chrono::{DateTime, Utc};

pub mod counter;
pub mod ledger;
pub mod scheduler;
pub mod tickets;
pub mod types;

/// Environment module - dependency injection traits shared by all services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now <= chrono::Utc::now());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Boxed future returned by the store traits.
///
/// The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they
/// stay dyn-compatible and can be shared as `Arc<dyn CounterStore>` etc.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub use counter::{CounterError, CounterStore};
pub use environment::{Clock, SystemClock};
pub use ledger::{CreateOutcome, ExpiryTransition, LedgerError, NewOrder, OrderLedger};
pub use scheduler::{JobId, JobScheduler, RollbackPayload, SchedulerError, SignatureVerifier};
pub use tickets::{
    MailerError, ScanOutcome, SignerError, TicketMailer, TicketRegistry, TicketSigner,
};
pub use types::*;

//! # Box Office Testing
//!
//! Testing utilities for the Box Office reservation system.
//!
//! This crate provides:
//! - In-memory implementations of every store trait in `boxoffice-core`
//! - Recording doubles for the job transport, ticket signer and mailer
//! - A fixed clock for deterministic timestamps
//! - Fault injection switches to exercise compensation and retry paths
//!
//! The in-memory stores keep the same atomicity guarantees as the production
//! backends: each operation takes one lock for its whole check-and-mutate step.
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{CounterStore, TierId};
//! use boxoffice_testing::InMemoryCounterStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let counters = InMemoryCounterStore::new();
//! let vip = TierId::parse("VIP")?;
//! counters.initialize(&vip, 5).await?;
//!
//! assert_eq!(counters.reserve(&vip, 3).await?, 2);
//! assert!(counters.reserve(&vip, 3).await.is_err());
//! assert_eq!(counters.available(&vip), Some(2));
//! # Ok(())
//! # }
//! ```

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod counter_mocks;
pub mod ledger_mocks;
pub mod transport_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time until [`FixedClock::advance`] is called.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward, e.g. past a hold window.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test data builders.
pub mod helpers {
    use boxoffice_core::{BuyerInfo, CheckoutId, TierId};

    /// Parse a tier id known to be valid.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is not a valid tier id.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn tier(raw: &str) -> TierId {
        TierId::parse(raw).expect("test tier id should be valid")
    }

    /// Parse a checkout id known to be valid.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is not a valid checkout id.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn checkout(raw: &str) -> CheckoutId {
        CheckoutId::parse(raw).expect("test checkout id should be valid")
    }

    /// A buyer with deterministic contact details.
    #[must_use]
    pub fn buyer(name: &str) -> BuyerInfo {
        BuyerInfo {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            phone: Some("+1-555-0100".to_string()),
        }
    }
}

// Re-export commonly used items
pub use counter_mocks::InMemoryCounterStore;
pub use ledger_mocks::{InMemoryOrderLedger, InMemoryTicketRegistry};
pub use mocks::{FixedClock, test_clock};
pub use transport_mocks::{
    FakeTicketSigner, RecordingMailer, RecordingScheduler, StaticSignatureVerifier,
};

//! Deferred job transport contract.
//!
//! Rollbacks are not timers inside this process: a reservation hands a
//! [`RollbackPayload`] to an external at-least-once scheduler, which calls the
//! rollback webhook once the hold window has elapsed. The handling process may be
//! cold-started in between, and the same payload may be delivered more than once.

use crate::types::{CheckoutId, TierId};
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identifier assigned to a scheduled job by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a transport-assigned job id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the job id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a rollback job, signed by the transport on delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPayload {
    /// Checkout whose hold should be released
    pub checkout_id: CheckoutId,
    /// Tier that was held
    pub tier: TierId,
    /// Quantity that was held
    pub quantity: u32,
}

/// Errors raised by the job transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The transport refused the request (bad payload, auth, quota).
    #[error("Scheduler rejected request: {0}")]
    Rejected(String),

    /// Network or transport failure.
    #[error("Scheduler transport error: {0}")]
    Transport(String),
}

/// Schedules and cancels delayed webhook deliveries.
pub trait JobScheduler: Send + Sync {
    /// Schedule `payload` for delivery after `delay`.
    ///
    /// # Errors
    ///
    /// - `Rejected`: the transport refused the job
    /// - `Transport`: the transport could not be reached
    fn schedule(
        &self,
        payload: &RollbackPayload,
        delay: Duration,
    ) -> BoxFuture<'_, Result<JobId, SchedulerError>>;

    /// Cancel a scheduled job. Returns `false` if it was unknown or already delivered.
    ///
    /// # Errors
    ///
    /// - `Transport`: the transport could not be reached
    fn cancel(&self, job_id: &JobId) -> BoxFuture<'_, Result<bool, SchedulerError>>;
}

/// Verifies the signature the transport attaches to each delivery.
///
/// Implementations must compare in constant time and return `false` for any
/// malformed input.
pub trait SignatureVerifier: Send + Sync {
    /// Whether `signature` is valid for the exact raw `body` bytes.
    fn verify(&self, signature: &str, body: &[u8]) -> bool;
}

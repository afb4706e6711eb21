//! Doubles for the job transport, webhook signatures, QR signing and email.

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned locks is acceptable

use boxoffice_core::tickets::TicketClaims;
use boxoffice_core::{
    BoxFuture, JobId, JobScheduler, MailerError, Order, RollbackPayload, SchedulerError,
    SignatureVerifier, SignerError, Ticket, TicketMailer, TicketSigner,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A job handed to the [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    /// Assigned job id
    pub job_id: JobId,
    /// Payload that would be delivered
    pub payload: RollbackPayload,
    /// Requested delay
    pub delay: Duration,
}

/// Job scheduler that records jobs instead of delivering them.
///
/// Tests drive delivery themselves by passing [`ScheduledJob::payload`] to the
/// rollback handler, as many times as they want.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
    cancelled: Arc<Mutex<HashSet<JobId>>>,
    next_id: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl RecordingScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `schedule` and `cancel` fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All jobs scheduled so far, in order.
    #[must_use]
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Whether `cancel` was called for a job.
    #[must_use]
    pub fn was_cancelled(&self, job_id: &JobId) -> bool {
        self.cancelled.lock().unwrap().contains(job_id)
    }

    fn check_failing(&self) -> Result<(), SchedulerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Transport("scheduler unreachable".to_string()));
        }
        Ok(())
    }
}

impl JobScheduler for RecordingScheduler {
    fn schedule(
        &self,
        payload: &RollbackPayload,
        delay: Duration,
    ) -> BoxFuture<'_, Result<JobId, SchedulerError>> {
        let result = self.check_failing().map(|()| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let job_id = JobId::new(format!("job-{n}"));
            self.jobs.lock().unwrap().push(ScheduledJob {
                job_id: job_id.clone(),
                payload: payload.clone(),
                delay,
            });
            job_id
        });
        Box::pin(async move { result })
    }

    fn cancel(&self, job_id: &JobId) -> BoxFuture<'_, Result<bool, SchedulerError>> {
        let result = self.check_failing().map(|()| {
            let known = self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .any(|job| &job.job_id == job_id);
            known && self.cancelled.lock().unwrap().insert(job_id.clone())
        });
        Box::pin(async move { result })
    }
}

/// Verifier that accepts exactly one signature string, regardless of body.
#[derive(Debug, Clone)]
pub struct StaticSignatureVerifier {
    accepted: String,
}

impl StaticSignatureVerifier {
    /// Accept only `signature`.
    #[must_use]
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            accepted: signature.into(),
        }
    }
}

impl SignatureVerifier for StaticSignatureVerifier {
    fn verify(&self, signature: &str, _body: &[u8]) -> bool {
        signature == self.accepted
    }
}

/// Unsigned QR payloads: the claims as plain JSON.
///
/// Verification only checks that the payload decodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeTicketSigner;

impl TicketSigner for FakeTicketSigner {
    fn sign(&self, claims: &TicketClaims) -> Result<String, SignerError> {
        serde_json::to_string(claims).map_err(|e| SignerError(e.to_string()))
    }

    fn verify(&self, payload: &str) -> Option<TicketClaims> {
        serde_json::from_str(payload).ok()
    }
}

/// Mailer that records deliveries and can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<(String, usize)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingMailer {
    /// Create a mailer with no deliveries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(recipient, ticket count)` for each successful delivery.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, usize)> {
        self.sent.lock().unwrap().clone()
    }
}

impl TicketMailer for RecordingMailer {
    fn send_tickets<'a>(
        &'a self,
        order: &'a Order,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, Result<(), MailerError>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(MailerError("smtp relay refused connection".to_string()))
        } else {
            self.sent
                .lock()
                .unwrap()
                .push((order.buyer.email.clone(), tickets.len()));
            Ok(())
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{checkout, tier};
    use boxoffice_core::TicketId;

    fn payload() -> RollbackPayload {
        RollbackPayload {
            checkout_id: checkout("co-1"),
            tier: tier("GA"),
            quantity: 2,
        }
    }

    #[tokio::test]
    async fn scheduler_records_and_cancels() {
        let scheduler = RecordingScheduler::new();
        let job = scheduler
            .schedule(&payload(), Duration::from_secs(900))
            .await
            .unwrap();

        assert_eq!(job.as_str(), "job-1");
        assert_eq!(scheduler.jobs()[0].payload, payload());
        assert!(scheduler.cancel(&job).await.unwrap());
        assert!(!scheduler.cancel(&job).await.unwrap());
        assert!(!scheduler.cancel(&JobId::new("job-99")).await.unwrap());
        assert!(scheduler.was_cancelled(&job));
    }

    #[tokio::test]
    async fn failing_scheduler_reports_transport_error() {
        let scheduler = RecordingScheduler::new();
        scheduler.set_failing(true);
        let err = scheduler
            .schedule(&payload(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Transport(_)));
    }

    #[test]
    fn static_verifier_accepts_only_its_signature() {
        let verifier = StaticSignatureVerifier::new("good");
        assert!(verifier.verify("good", b"anything"));
        assert!(!verifier.verify("bad", b"anything"));
    }

    #[test]
    fn fake_signer_decodes_own_payloads() {
        let claims = TicketClaims {
            ticket_id: TicketId::new(),
            buyer_name: "Ada".to_string(),
            tier: tier("VIP"),
        };
        let payload = FakeTicketSigner.sign(&claims).unwrap();
        assert_eq!(FakeTicketSigner.verify(&payload), Some(claims));
        assert_eq!(FakeTicketSigner.verify("garbage"), None);
    }
}

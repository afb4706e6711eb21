//! HMAC-SHA256 signing for webhook deliveries and ticket QR payloads.
//!
//! # Webhook signatures
//!
//! The job transport and the payment provider sign the raw request body:
//! `base64(HMAC-SHA256(key, body))`, standard alphabet with padding, in the
//! `X-Job-Signature` / `X-Payment-Signature` header.
//!
//! # QR payloads
//!
//! `base64url(claims_json) "." base64url(HMAC-SHA256(key, base64url(claims_json)))`,
//! URL-safe alphabet without padding so the payload survives QR encoders and URLs.
//!
//! All comparisons use `constant_time_eq`.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use boxoffice_core::tickets::TicketClaims;
use boxoffice_core::{SignatureVerifier, SignerError, TicketSigner};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> Result<HmacSha256, SignerError> {
    if key.is_empty() {
        return Err(SignerError("signing key must not be empty".to_string()));
    }
    HmacSha256::new_from_slice(key).map_err(|e| SignerError(e.to_string()))
}

fn digest(mac: &HmacSha256, data: &[u8]) -> Vec<u8> {
    let mut mac = mac.clone();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies `base64(HMAC-SHA256(key, body))` webhook signatures.
#[derive(Clone)]
pub struct HmacSignatureVerifier {
    mac: HmacSha256,
}

impl HmacSignatureVerifier {
    /// Create a verifier for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] if the key is empty.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, SignerError> {
        Ok(Self {
            mac: keyed(key.as_ref())?,
        })
    }

    /// Signature for `body`, as a sender would compute it.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        STANDARD.encode(digest(&self.mac, body))
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, signature: &str, body: &[u8]) -> bool {
        let Ok(provided) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        let expected = digest(&self.mac, body);
        constant_time_eq::constant_time_eq(&provided, &expected)
    }
}

impl fmt::Debug for HmacSignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSignatureVerifier").finish_non_exhaustive()
    }
}

/// Signs ticket claims into tamper-evident QR payloads.
#[derive(Clone)]
pub struct HmacTicketSigner {
    mac: HmacSha256,
}

impl HmacTicketSigner {
    /// Create a signer for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] if the key is empty.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, SignerError> {
        Ok(Self {
            mac: keyed(key.as_ref())?,
        })
    }
}

impl TicketSigner for HmacTicketSigner {
    fn sign(&self, claims: &TicketClaims) -> Result<String, SignerError> {
        let json = serde_json::to_vec(claims).map_err(|e| SignerError(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(digest(&self.mac, body.as_bytes()));
        Ok(format!("{body}.{signature}"))
    }

    fn verify(&self, payload: &str) -> Option<TicketClaims> {
        let (body, signature) = payload.trim().split_once('.')?;
        let provided = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let expected = digest(&self.mac, body.as_bytes());
        if !constant_time_eq::constant_time_eq(&provided, &expected) {
            return None;
        }
        let json = URL_SAFE_NO_PAD.decode(body).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

impl fmt::Debug for HmacTicketSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTicketSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::{TicketId, TierId};

    #[test]
    fn webhook_signature_covers_exact_body() {
        let verifier = HmacSignatureVerifier::new("job-secret").unwrap();
        let body = br#"{"checkoutId":"co-1","tier":"VIP","quantity":2}"#;
        let signature = verifier.sign(body);

        assert!(verifier.verify(&signature, body));
        assert!(!verifier.verify(&signature, br#"{"checkoutId":"co-1","tier":"VIP","quantity":3}"#));
        assert!(!verifier.verify("not base64!", body));
        assert!(!verifier.verify("", body));

        let other = HmacSignatureVerifier::new("other-secret").unwrap();
        assert!(!other.verify(&signature, body));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(HmacSignatureVerifier::new("").is_err());
        assert!(HmacTicketSigner::new(b"").is_err());
    }

    #[test]
    fn ticket_payload_detects_tampering() {
        let signer = HmacTicketSigner::new("ticket-secret").unwrap();
        let claims = TicketClaims {
            ticket_id: TicketId::new(),
            buyer_name: "Ada Lovelace".to_string(),
            tier: TierId::parse("VIP").unwrap(),
        };
        let payload = signer.sign(&claims).unwrap();
        assert_eq!(signer.verify(&payload), Some(claims.clone()));

        let (_, signature) = payload.split_once('.').unwrap();
        let forged_claims = TicketClaims {
            tier: TierId::parse("GA").unwrap(),
            ..claims
        };
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_eq!(signer.verify(&format!("{forged_body}.{signature}")), None);
        assert_eq!(signer.verify("no-dot-here"), None);

        let other = HmacTicketSigner::new("other-secret").unwrap();
        assert_eq!(other.verify(&payload), None);
    }
}

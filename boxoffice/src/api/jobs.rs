//! Rollback webhook called by the job transport.

use crate::server::{AppError, AppState};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;

/// Header carrying the transport's signature over the raw body.
pub const JOB_SIGNATURE_HEADER: &str = "X-Job-Signature";

/// Rollback delivery response.
#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    /// `rolled_back`, `already_paid`, `already_rolled_back`, `already_expired`,
    /// `already_cancelled` or `no_order`
    pub status: &'static str,
}

/// `POST /api/jobs/rollback`
///
/// Any 2xx tells the transport the delivery is done. The body is read as raw
/// bytes so the signature is checked against exactly what was signed.
///
/// # Errors
///
/// 401 on a missing or forged signature, 422 for a malformed payload, 503 when
/// a store is down and 500 when the order expired but its release failed; the
/// transport redelivers on every 5xx.
pub async fn rollback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RollbackResponse>, AppError> {
    let signature = headers
        .get(JOB_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.rollback.handle_delivery(signature, &body).await?;

    Ok(Json(RollbackResponse {
        status: outcome.as_str(),
    }))
}

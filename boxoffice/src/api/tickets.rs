//! Door scanning endpoint.

use crate::server::{AdminAuth, AppError, AppState};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use boxoffice_core::ScanOutcome;
use serde::Deserialize;

/// Body of `POST /api/tickets/scan`.
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// QR payload read at the door
    pub payload: String,
}

/// `POST /api/tickets/scan` (admin token)
///
/// The body is always the tagged [`ScanOutcome`]; the status code lets simple
/// scanners branch without parsing it:
///
/// | result            | status |
/// |-------------------|--------|
/// | `admitted`        | 200    |
/// | `already_scanned` | 409    |
/// | `void`            | 409    |
/// | `unknown`         | 404    |
/// | `invalid`         | 422    |
///
/// # Errors
///
/// 401 without the admin token, 503 when the ticket registry is down.
pub async fn scan_ticket(
    _admin: AdminAuth,
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScanOutcome>), AppError> {
    let Json(request) = payload?;
    let outcome = state.scanner.scan(&request.payload).await?;

    let status = match outcome {
        ScanOutcome::Admitted { .. } => StatusCode::OK,
        ScanOutcome::AlreadyScanned { .. } | ScanOutcome::Void => StatusCode::CONFLICT,
        ScanOutcome::Unknown => StatusCode::NOT_FOUND,
        ScanOutcome::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(outcome)))
}

//! Public tier listing.

use crate::app::TierSnapshot;
use crate::server::{AppError, AppState};
use axum::{Json, extract::State};
use serde::Serialize;

/// `GET /api/tiers` response.
#[derive(Debug, Serialize)]
pub struct TiersResponse {
    /// All initialized tiers
    pub tiers: Vec<TierSnapshot>,
}

/// `GET /api/tiers`
///
/// # Errors
///
/// 503 when the counter store or ledger is down.
pub async fn list_tiers(State(state): State<AppState>) -> Result<Json<TiersResponse>, AppError> {
    let tiers = state.admission.snapshot().await?;
    Ok(Json(TiersResponse { tiers }))
}

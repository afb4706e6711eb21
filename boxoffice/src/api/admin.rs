//! Admin inventory endpoint.

use crate::app::{InventoryCommand, TierSnapshot};
use crate::server::{AdminAuth, AppError, AppState};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Serialize;

/// Snapshot returned by every admin command.
#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    /// All initialized tiers
    pub tiers: Vec<TierSnapshot>,
}

/// `POST /api/admin/inventory` (admin token)
///
/// ```json
/// {"action": "initialize", "tier": "VIP", "count": 100}
/// ```
///
/// # Errors
///
/// 401 without the admin token, 422 for commands rejected by validation or an
/// unknown `action`, 503 when a store is down.
pub async fn inventory(
    _admin: AdminAuth,
    State(state): State<AppState>,
    payload: Result<Json<InventoryCommand>, JsonRejection>,
) -> Result<Json<InventoryResponse>, AppError> {
    let Json(command) = payload?;
    tracing::info!(?command, "Admin inventory command");

    let tiers = state.admission.execute(command).await?;
    Ok(Json(InventoryResponse { tiers }))
}

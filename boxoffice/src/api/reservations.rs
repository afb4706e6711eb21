//! Reservation endpoints.
//!
//! ```text
//! POST /api/reservations                         -> 201 pending hold
//! GET  /api/reservations/:checkout_id            -> order status
//! POST /api/reservations/:checkout_id/release    -> {"released": bool}
//! ```

use crate::app::ReserveTickets;
use crate::server::{AppError, AppState, ClientKey};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use boxoffice_core::{BuyerInfo, CheckoutId, Order, OrderStatus, TierId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/reservations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// Client-chosen checkout id, making retries idempotent
    #[serde(default)]
    pub checkout_id: Option<CheckoutId>,
    /// Tier to hold
    pub tier: TierId,
    /// Number of tickets
    pub quantity: u32,
    /// Buyer name
    pub buyer_name: String,
    /// Buyer email
    pub buyer_email: String,
    /// Buyer phone
    #[serde(default)]
    pub buyer_phone: Option<String>,
}

/// An order as seen by the buyer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    /// Checkout id
    pub checkout_id: CheckoutId,
    /// Order status
    pub status: OrderStatus,
    /// Tier held
    pub tier: TierId,
    /// Quantity held
    pub quantity: u32,
    /// When the hold is rolled back unless paid; only while pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ReservationResponse {
    fn new(order: &Order, expires_at: DateTime<Utc>) -> Self {
        Self {
            checkout_id: order.checkout_id.clone(),
            status: order.status,
            tier: order.tier.clone(),
            quantity: order.quantity,
            expires_at: order.is_pending().then_some(expires_at),
        }
    }
}

/// Body of the release response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    /// Checkout id
    pub checkout_id: CheckoutId,
    /// Whether this call returned the tickets to inventory
    pub released: bool,
}

fn checkout_id(raw: &str) -> Result<CheckoutId, AppError> {
    CheckoutId::parse(raw).map_err(|e| AppError::validation(e.to_string()))
}

/// Place a hold.
///
/// # Errors
///
/// 409 `SOLD_OUT`, 429 `TOO_MANY_HOLDS`, 422 validation, 503 when a store is down.
pub async fn create_reservation(
    State(state): State<AppState>,
    ClientKey(client_key): ClientKey,
    payload: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservationResponse>), AppError> {
    let Json(request) = payload?;

    let reservation = state
        .coordinator
        .reserve_tickets(ReserveTickets {
            checkout_id: request.checkout_id,
            tier: request.tier,
            quantity: request.quantity,
            buyer: BuyerInfo {
                name: request.buyer_name,
                email: request.buyer_email,
                phone: request.buyer_phone,
            },
            client_key,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::new(
            &reservation.order,
            reservation.expires_at,
        )),
    ))
}

/// Read an order.
///
/// # Errors
///
/// 404 for unknown checkout ids, 503 when the ledger is down.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ReservationResponse>, AppError> {
    let checkout_id = checkout_id(&raw_id)?;
    let order = state.coordinator.get_order(&checkout_id).await?;
    let expires_at = state.coordinator.policy().deadline(order.created_at);
    Ok(Json(ReservationResponse::new(&order, expires_at)))
}

/// Release a hold before it expires.
///
/// Unknown or already finalized checkouts answer `{"released": false}`.
///
/// # Errors
///
/// 422 for a malformed checkout id, 500 when the order was cancelled but the
/// counter release failed, 503 when a store is down.
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let checkout_id = checkout_id(&raw_id)?;
    let released = state
        .coordinator
        .release_on_explicit_cancel(&checkout_id)
        .await?;
    Ok(Json(ReleaseResponse {
        checkout_id,
        released,
    }))
}

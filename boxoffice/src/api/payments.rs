//! Payment provider webhook.

use crate::server::{AppError, AppState};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use boxoffice_core::{CheckoutId, OrderStatus, Ticket, TicketId, TicketStatus, TierId};
use serde::Serialize;

/// Header carrying the provider's signature over the raw body.
pub const PAYMENT_SIGNATURE_HEADER: &str = "X-Payment-Signature";

/// A ticket as returned to the buyer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    /// Ticket id
    pub id: TicketId,
    /// Tier
    pub tier: TierId,
    /// `active`, `used` or `void`
    pub status: TicketStatus,
    /// Signed payload to encode as a QR code
    pub qr_payload: String,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            tier: ticket.tier,
            status: ticket.status,
            qr_payload: ticket.qr_payload,
        }
    }
}

/// Payment confirmation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    /// Checkout id
    pub checkout_id: CheckoutId,
    /// Always `paid`
    pub status: OrderStatus,
    /// Issued tickets
    pub tickets: Vec<TicketView>,
}

/// `POST /api/payments/confirm`
///
/// # Errors
///
/// 401 on a missing or forged signature, 404 for unknown checkouts, 409 when the
/// order already expired or was cancelled (refund required), 503 when a store is down.
pub async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConfirmPaymentResponse>, AppError> {
    let signature = headers
        .get(PAYMENT_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let confirmation = state.payments.handle_webhook(signature, &body).await?;

    Ok(Json(ConfirmPaymentResponse {
        checkout_id: confirmation.order.checkout_id,
        status: confirmation.order.status,
        tickets: confirmation.tickets.into_iter().map(TicketView::from).collect(),
    }))
}

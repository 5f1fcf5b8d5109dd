//! Checkout request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{CartItem, PurchaseId, ReservationId};
use crate::service::{CheckoutCommand, CheckoutReceipt};

/// Request body for `POST /checkout`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Buyer contact email.
    pub email: String,
    /// Requested ticket lines.
    pub items: Vec<CartItem>,
}

impl From<CheckoutRequest> for CheckoutCommand {
    fn from(req: CheckoutRequest) -> Self {
        Self {
            email: req.email,
            items: req.items,
        }
    }
}

/// Response body for `POST /checkout`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    /// Hosted payment page to redirect the buyer to.
    pub url: String,
    /// Payment session identifier.
    pub session_id: String,
    /// Pending purchase.
    pub purchase_id: PurchaseId,
    /// Reservation holding the tickets.
    pub reservation_id: ReservationId,
    /// When the hold lapses if payment has not completed.
    pub expires_at: DateTime<Utc>,
}

impl From<CheckoutReceipt> for CheckoutResponse {
    fn from(receipt: CheckoutReceipt) -> Self {
        Self {
            url: receipt.url,
            session_id: receipt.session_id,
            purchase_id: receipt.purchase_id,
            reservation_id: receipt.reservation_id,
            expires_at: receipt.expires_at,
        }
    }
}

//! Purchase lookup response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{EventId, IssuedTicket, Money, PaymentStatus, PurchaseDetails, PurchaseId};

/// Response body for `GET /purchases/session/{session_id}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseResponse {
    /// Purchase identifier.
    pub purchase_id: PurchaseId,
    /// Event of the purchase.
    pub event_id: EventId,
    /// Buyer email.
    pub email: String,
    /// Order total in cents.
    pub total_cents: Money,
    /// Payment status.
    pub payment_status: PaymentStatus,
    /// Issued tickets (empty until payment completes).
    pub tickets: Vec<IssuedTicket>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<PurchaseDetails> for PurchaseResponse {
    fn from(details: PurchaseDetails) -> Self {
        Self {
            purchase_id: details.purchase.id,
            event_id: details.purchase.event_id,
            email: details.purchaser_email,
            total_cents: details.purchase.total_amount,
            payment_status: details.purchase.payment_status,
            tickets: details.tickets,
            created_at: details.purchase.created_at,
        }
    }
}

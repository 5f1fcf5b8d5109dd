//! Ledger request/response models and row conversions.

use chrono::{DateTime, Utc};

use crate::domain::{
    EventId, IssuedTicket, Money, PendingPurchase, PurchaseId, PurchaseLine, TicketType,
    TicketTypeId, UserId,
};
use crate::error::GatewayError;

/// Row tuple selected from `ticket_types`.
pub(crate) type TicketTypeRow = (i64, i64, String, i64, i32, i32);

/// Row tuple selected from `purchases`.
pub(crate) type PurchaseRow = (
    i64,
    i64,
    i64,
    i64,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Input for [`super::Ledger::create_pending_purchase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPurchase {
    /// Buyer.
    pub user_id: UserId,
    /// Event the cart belongs to.
    pub event_id: EventId,
    /// Order total.
    pub total_amount: Money,
}

/// A ticket to insert at fulfillment, with its pre-generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    /// Ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Unique scan code.
    pub code: String,
}

/// Everything the ledger needs to commit one paid purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilmentRequest {
    /// Pending purchase to settle.
    pub purchase_id: PurchaseId,
    /// Buyer recorded in the session metadata.
    pub user_id: UserId,
    /// Gateway session identifier stored on the purchase.
    pub session_id: String,
    /// Purchased lines.
    pub lines: Vec<PurchaseLine>,
    /// One ticket per purchased unit.
    pub tickets: Vec<NewTicket>,
}

/// Tickets committed by a fulfillment, for the confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilledPurchase {
    /// Settled purchase.
    pub purchase_id: PurchaseId,
    /// Event of the purchase.
    pub event_id: EventId,
    /// Buyer email address on file.
    pub purchaser_email: String,
    /// Issued tickets.
    pub tickets: Vec<IssuedTicket>,
}

/// Result of [`super::Ledger::fulfil_purchase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfilmentOutcome {
    /// Purchase marked succeeded; tickets issued and sold counts advanced.
    Fulfilled(FulfilledPurchase),
    /// The purchase was already settled; nothing was written.
    AlreadyFulfilled,
    /// The purchase was already marked failed; nothing was written.
    AlreadyRejected,
    /// Selling the lines would exceed capacity (the reservation lapsed and its
    /// units were resold). No tickets were issued and the purchase is now
    /// marked failed.
    CapacityExhausted {
        /// First ticket type without room.
        ticket_type_id: TicketTypeId,
    },
}

fn quantity(raw: i32, column: &str) -> Result<u32, GatewayError> {
    u32::try_from(raw)
        .map_err(|_| GatewayError::PersistenceError(format!("negative {column}: {raw}")))
}

/// Converts a `ticket_types` row tuple.
pub(crate) fn ticket_type_from_row(row: TicketTypeRow) -> Result<TicketType, GatewayError> {
    let (id, event_id, name, price_cents, total, sold) = row;
    Ok(TicketType {
        id: TicketTypeId::new(id),
        event_id: EventId::new(event_id),
        name,
        price: Money::from_cents(price_cents),
        total_quantity: quantity(total, "total_quantity")?,
        sold_quantity: quantity(sold, "sold_quantity")?,
    })
}

/// Converts a `purchases` row tuple.
pub(crate) fn purchase_from_row(row: PurchaseRow) -> Result<PendingPurchase, GatewayError> {
    let (id, user_id, event_id, total_cents, status, session_id, created_at, updated_at) = row;
    Ok(PendingPurchase {
        id: PurchaseId::new(id),
        user_id: UserId::new(user_id),
        event_id: EventId::new(event_id),
        total_amount: Money::from_cents(total_cents),
        payment_status: status.parse()?,
        payment_session_id: session_id,
        created_at,
        updated_at,
    })
}

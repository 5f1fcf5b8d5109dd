//! Purchases and issued tickets.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, Money, PurchaseId, TicketTypeId, UserId};
use crate::error::GatewayError;

/// Payment state of a purchase. Transitions once from `Pending` to a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created at checkout, awaiting the gateway.
    Pending,
    /// Payment confirmed and tickets issued.
    Succeeded,
    /// Payment could not be honored.
    Failed,
}

impl PaymentStatus {
    /// Column value stored in `purchases.payment_status`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(GatewayError::Internal(format!(
                "unknown payment status {other:?}"
            ))),
        }
    }
}

/// Status of an issued ticket. Only `Valid` is written by fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Usable for entry.
    Valid,
    /// Scanned at the door.
    Used,
    /// Voided.
    Cancelled,
}

impl TicketStatus {
    /// Column value stored in `tickets.status`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "used" => Ok(Self::Used),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(GatewayError::Internal(format!(
                "unknown ticket status {other:?}"
            ))),
        }
    }
}

/// One priced line of a purchase, as echoed back by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PurchaseLine {
    /// Purchased ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Units purchased.
    pub quantity: u32,
    /// Price per unit at checkout time.
    pub unit_price: Money,
}

/// Durable purchase row created before the payment session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PendingPurchase {
    /// Ledger primary key.
    pub id: PurchaseId,
    /// Buyer.
    pub user_id: UserId,
    /// Event the cart belongs to.
    pub event_id: EventId,
    /// Order total.
    pub total_amount: Money,
    /// Current payment status.
    pub payment_status: PaymentStatus,
    /// Gateway session id, recorded at fulfillment.
    pub payment_session_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A ticket issued at fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Ticket {
    /// Ledger primary key.
    pub id: i64,
    /// Ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Holder.
    pub user_id: UserId,
    /// Purchase that paid for this ticket.
    pub purchase_id: PurchaseId,
    /// Unique scan code.
    pub code: String,
    /// Ticket status.
    pub status: TicketStatus,
}

/// Ticket as shown to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IssuedTicket {
    /// Ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Ticket type display name.
    pub ticket_type_name: String,
    /// Unique scan code.
    pub code: String,
    /// Ticket status.
    pub status: TicketStatus,
}

/// A purchase with its issued tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurchaseDetails {
    /// Purchase row.
    pub purchase: PendingPurchase,
    /// Buyer email address.
    pub purchaser_email: String,
    /// Tickets issued for this purchase (empty until fulfilled).
    pub tickets: Vec<IssuedTicket>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_round_trips_column_values() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().ok(), Some(status));
        }
        assert!("refunded".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn ticket_status_parses_known_values() {
        assert_eq!("valid".parse::<TicketStatus>().ok(), Some(TicketStatus::Valid));
        assert!("lost".parse::<TicketStatus>().is_err());
    }
}

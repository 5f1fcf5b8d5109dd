//! Ticket type rows from the inventory ledger.

use serde::Serialize;
use utoipa::ToSchema;

use super::{EventId, Money, TicketTypeId};

/// Durable inventory for one kind of ticket at one event.
///
/// `sold_quantity` is only ever incremented by fulfillment and never
/// exceeds `total_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TicketType {
    /// Ledger primary key.
    pub id: TicketTypeId,
    /// Event this ticket type belongs to.
    pub event_id: EventId,
    /// Display name (e.g. `"General Admission"`).
    pub name: String,
    /// Unit price.
    pub price: Money,
    /// Capacity set at event setup.
    pub total_quantity: u32,
    /// Units durably sold.
    pub sold_quantity: u32,
}

impl TicketType {
    /// Units not yet sold, ignoring transient holds.
    #[must_use]
    pub const fn unsold(&self) -> u32 {
        self.total_quantity.saturating_sub(self.sold_quantity)
    }

    /// Units available for a new hold given the current held counter.
    #[must_use]
    pub const fn available(&self, held: u32) -> u32 {
        self.unsold().saturating_sub(held)
    }
}

/// Point-in-time availability of a ticket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Availability {
    /// Ticket type this view describes.
    pub ticket_type_id: TicketTypeId,
    /// Capacity.
    pub total: u32,
    /// Durably sold units.
    pub sold: u32,
    /// Units currently held by unexpired reservations.
    pub held: u32,
    /// Units a new checkout could hold right now.
    pub available: u32,
}

impl Availability {
    /// Combines a ledger row with the hold store's counter.
    #[must_use]
    pub const fn new(ticket_type: &TicketType, held: u32) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            total: ticket_type.total_quantity,
            sold: ticket_type.sold_quantity,
            held,
            available: ticket_type.available(held),
        }
    }
}

//! Domain layer: identifiers, inventory rows, carts, reservations, and
//! purchases.
//!
//! These types are shared by the ledger, the hold store, the payment
//! gateway adapter, and the services that coordinate them.

pub mod cart;
pub mod ids;
pub mod metadata;
pub mod money;
pub mod purchase;
pub mod reservation;
pub mod ticket_type;

pub use cart::{Cart, CartItem};
pub use ids::{EventId, PurchaseId, ReservationId, TicketTypeId, UserId};
pub use metadata::SessionMetadata;
pub use money::Money;
pub use purchase::{
    IssuedTicket, PaymentStatus, PendingPurchase, PurchaseDetails, PurchaseLine, Ticket,
    TicketStatus,
};
pub use reservation::{HoldItem, Reservation, ReservationPhase, ReservedLine};
pub use ticket_type::{Availability, TicketType};

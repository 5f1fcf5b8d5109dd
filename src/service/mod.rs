//! Service layer: checkout and fulfillment orchestration.
//!
//! [`ReservationCoordinator`] turns carts into held reservations with a
//! payment session, [`FulfillmentReconciler`] turns completed payments into
//! sold inventory, and [`Compensator`] returns holds that will never be
//! paid for. [`AvailabilityService`] is the read side.

pub mod availability;
pub mod codes;
pub mod compensator;
pub mod coordinator;
pub mod reconciler;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub(crate) mod test_support;

pub use availability::{AvailabilityService, Readiness};
pub use codes::{SequentialCodeGenerator, TicketCodeGenerator, UuidCodeGenerator};
pub use compensator::Compensator;
pub use coordinator::{CheckoutCommand, CheckoutReceipt, CheckoutSettings, ReservationCoordinator};
pub use reconciler::{FulfillmentReconciler, NotificationOutcome};

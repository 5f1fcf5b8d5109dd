//! Persistence layer: the durable inventory ledger.
//!
//! The [`Ledger`] trait is the source of truth for total and sold ticket
//! counts, pending purchases, and issued tickets. [`postgres::PostgresLedger`]
//! is the production implementation on `sqlx::PgPool`;
//! [`memory::InMemoryLedger`] backs the test suite.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;

use crate::domain::{PendingPurchase, PurchaseDetails, PurchaseId, TicketType, TicketTypeId, UserId};
use crate::error::GatewayError;

pub use memory::InMemoryLedger;
pub use models::{FulfilledPurchase, FulfilmentOutcome, FulfilmentRequest, NewPurchase, NewTicket};
pub use postgres::PostgresLedger;

/// Ticket type rows read under lock.
///
/// The locks are held until [`LockedTicketTypes::finish`] is called or the
/// value is dropped, so a concurrent reader cannot observe a `sold_quantity`
/// that is about to change while a checkout is deciding on it.
#[async_trait]
pub trait LockedTicketTypes: Send + fmt::Debug {
    /// The locked rows, in ascending id order. Ids with no row are absent.
    fn ticket_types(&self) -> &[TicketType];

    /// Ends the read and releases the locks.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the ledger rejects the
    /// commit.
    async fn finish(self: Box<Self>) -> Result<(), GatewayError>;
}

/// Durable ticket inventory and purchase records.
#[async_trait]
pub trait Ledger: Send + Sync + fmt::Debug {
    /// Reads the given ticket types in one query, locking their rows.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn lock_ticket_types(
        &self,
        ids: &[TicketTypeId],
    ) -> Result<Box<dyn LockedTicketTypes>, GatewayError>;

    /// Returns the user id for `email`, creating a guest account if none
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn find_or_create_guest(&self, email: &str) -> Result<UserId, GatewayError>;

    /// Inserts a purchase in the `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn create_pending_purchase(&self, purchase: NewPurchase)
    -> Result<PurchaseId, GatewayError>;

    /// Settles a paid purchase in one transaction: marks it succeeded,
    /// inserts its tickets, and advances `sold_quantity` for every line.
    ///
    /// Settling an already-succeeded purchase writes nothing and returns
    /// [`FulfilmentOutcome::AlreadyFulfilled`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the transaction fails
    /// (nothing is committed), or [`GatewayError::Internal`] if the purchase
    /// does not exist or belongs to another user.
    async fn fulfil_purchase(
        &self,
        request: FulfilmentRequest,
    ) -> Result<FulfilmentOutcome, GatewayError>;

    /// Reads one ticket type without locking.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, GatewayError>;

    /// Reads one purchase.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn purchase(&self, id: PurchaseId) -> Result<Option<PendingPurchase>, GatewayError>;

    /// Looks up a settled purchase and its tickets by gateway session id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on database failure.
    async fn purchase_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PurchaseDetails>, GatewayError>;

    /// Round-trips to the ledger without reading or writing any row.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the ledger is
    /// unreachable.
    async fn ping(&self) -> Result<(), GatewayError>;
}

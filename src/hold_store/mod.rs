//! Hold store: transient per-ticket-type held counters and per-reservation
//! hold records.
//!
//! The only ways held counters change are [`HoldStore::attempt_hold`] (an
//! indivisible check-and-reserve across every line of a cart),
//! [`HoldStore::release`], and [`HoldStore::reclaim_expired`]. Both
//! implementations make each of these a single atomic step: the Redis store
//! runs them as server-side Lua scripts, the in-memory store under one
//! mutex.

pub mod memory_store;
pub mod redis_store;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{HoldItem, ReservationId, ReservedLine, TicketTypeId};
use crate::error::GatewayError;

pub use memory_store::InMemoryHoldStore;
pub use redis_store::RedisHoldStore;

/// Result of an atomic hold attempt.
///
/// Callers must inspect the variant; an `Ok` return alone does not mean
/// anything was held.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// Every line was held and the reservation recorded.
    Held,
    /// At least one line lacked stock; nothing was held.
    Insufficient {
        /// First ticket type found short.
        ticket_type_id: TicketTypeId,
    },
}

impl HoldOutcome {
    /// Returns `true` if the hold was applied.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Held)
    }
}

/// Transient inventory holds with time-to-live.
#[async_trait]
pub trait HoldStore: Send + Sync + fmt::Debug {
    /// Atomically checks availability for every item and, only if all pass,
    /// increments each held counter and records the reservation with an
    /// expiry of `now + ttl`.
    ///
    /// Availability is `total_quantity - sold_quantity - held`, where `held`
    /// is the store's current counter after expired reservations have been
    /// reclaimed. Partial holds are never left behind.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable
    /// or the reservation id is already in use.
    async fn attempt_hold(
        &self,
        items: &[HoldItem],
        reservation_id: ReservationId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<HoldOutcome, GatewayError>;

    /// Returns a reservation's held counts to availability and deletes its
    /// record. Releasing an unknown or already-released reservation is a
    /// no-op returning an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    async fn release(&self, reservation_id: ReservationId)
    -> Result<Vec<ReservedLine>, GatewayError>;

    /// Current held counter for a ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    async fn held_quantity(&self, ticket_type_id: TicketTypeId) -> Result<u32, GatewayError>;

    /// Lines recorded for a live reservation, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    async fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Vec<ReservedLine>>, GatewayError>;

    /// Releases up to `limit` reservations whose expiry is at or before
    /// `now`, returning how many were reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    async fn reclaim_expired(&self, now: DateTime<Utc>, limit: usize)
    -> Result<usize, GatewayError>;

    /// Checks that the store answers.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    async fn ping(&self) -> Result<(), GatewayError>;
}

/// Expiry instant for a hold taken at `now`, saturating on overflow.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|offset| now.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

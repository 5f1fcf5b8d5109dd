//! Reservations: identified bundles of time-bounded holds.
//!
//! A reservation is created by a successful hold attempt and is destroyed by
//! exactly one of fulfillment, compensation, or expiry. Its lifecycle is a
//! small state machine:
//!
//! ```text
//! Held ──► Purchased ──► Released      (paid)
//!   └────────────────────► Released    (abandoned / compensated / expired)
//! ```
//!
//! On the paid path the hold is only released after the sale is durably
//! committed, so `Purchased` can never be skipped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ReservationId, TicketTypeId};
use crate::error::GatewayError;

/// Input line for the atomic hold procedure.
///
/// `total_quantity` and `sold_quantity` come from the locked ledger
/// snapshot; the held counter is read inside the hold store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldItem {
    /// Ticket type to hold.
    pub ticket_type_id: TicketTypeId,
    /// Ledger capacity.
    pub total_quantity: u32,
    /// Ledger sold count at snapshot time.
    pub sold_quantity: u32,
    /// Units to hold.
    pub requested: u32,
}

/// Units held for one ticket type under a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReservedLine {
    /// Held ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Units held.
    pub quantity: u32,
}

/// Lifecycle phase of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationPhase {
    /// Capacity is held; payment has not been confirmed.
    Held,
    /// The sale is durably committed; the hold is still counted.
    Purchased,
    /// Held counters were returned and the record deleted.
    Released,
}

impl ReservationPhase {
    /// Lower-case phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Purchased => "purchased",
            Self::Released => "released",
        }
    }

    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Held, Self::Purchased) | (Self::Purchased | Self::Held, Self::Released)
        )
    }
}

impl fmt::Display for ReservationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkout attempt's bundle of holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    id: ReservationId,
    lines: Vec<ReservedLine>,
    expires_at: Option<DateTime<Utc>>,
    phase: ReservationPhase,
}

impl Reservation {
    /// Creates a reservation in the [`ReservationPhase::Held`] phase.
    #[must_use]
    pub fn held(id: ReservationId, lines: Vec<ReservedLine>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            lines,
            expires_at: Some(expires_at),
            phase: ReservationPhase::Held,
        }
    }

    /// Rebuilds a held reservation from correlation data echoed back by the
    /// payment gateway. The expiry instant is not carried there.
    #[must_use]
    pub fn recovered(id: ReservationId, lines: Vec<ReservedLine>) -> Self {
        Self {
            id,
            lines,
            expires_at: None,
            phase: ReservationPhase::Held,
        }
    }

    /// Reservation identifier.
    #[must_use]
    pub const fn id(&self) -> ReservationId {
        self.id
    }

    /// Held lines.
    #[must_use]
    pub fn lines(&self) -> &[ReservedLine] {
        &self.lines
    }

    /// Instant after which the hold no longer counts against availability,
    /// when known.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> ReservationPhase {
        self.phase
    }

    /// Records that the sale is durably committed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidTransition`] unless the reservation is
    /// currently held.
    pub fn mark_purchased(&mut self) -> Result<(), GatewayError> {
        self.advance(ReservationPhase::Purchased)
    }

    /// Records that the held counters were returned.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidTransition`] if already released.
    pub fn mark_released(&mut self) -> Result<(), GatewayError> {
        self.advance(ReservationPhase::Released)
    }

    fn advance(&mut self, next: ReservationPhase) -> Result<(), GatewayError> {
        if !self.phase.can_advance_to(next) {
            return Err(GatewayError::InvalidTransition {
                reservation_id: self.id,
                from: self.phase.as_str(),
                to: next.as_str(),
            });
        }
        tracing::debug!(
            reservation_id = %self.id,
            from = %self.phase,
            to = %next,
            "reservation phase changed"
        );
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation() -> Reservation {
        Reservation::held(
            ReservationId::new(),
            vec![ReservedLine {
                ticket_type_id: TicketTypeId::new(5),
                quantity: 2,
            }],
            Utc::now() + Duration::minutes(15),
        )
    }

    #[test]
    fn paid_path_goes_through_purchased() {
        let mut r = reservation();
        assert!(r.mark_purchased().is_ok());
        assert_eq!(r.phase(), ReservationPhase::Purchased);
        assert!(r.mark_released().is_ok());
        assert_eq!(r.phase(), ReservationPhase::Released);
    }

    #[test]
    fn abandoned_path_releases_from_held() {
        let mut r = reservation();
        assert!(r.mark_released().is_ok());
        assert_eq!(r.phase(), ReservationPhase::Released);
    }

    #[test]
    fn released_is_terminal() {
        let mut r = reservation();
        assert!(r.mark_released().is_ok());
        assert!(matches!(
            r.mark_purchased(),
            Err(GatewayError::InvalidTransition { .. })
        ));
        assert!(r.mark_released().is_err());
    }

    #[test]
    fn cannot_purchase_twice() {
        let mut r = reservation();
        assert!(r.mark_purchased().is_ok());
        assert!(r.mark_purchased().is_err());
    }

    #[test]
    fn recovered_reservations_start_held_without_expiry() {
        let r = Reservation::recovered(ReservationId::new(), Vec::new());
        assert_eq!(r.phase(), ReservationPhase::Held);
        assert!(r.expires_at().is_none());
        assert!(reservation().expires_at().is_some());
    }
}

//! In-process hold store guarded by a single mutex.
//!
//! Every operation takes the table lock for its whole duration, which makes
//! the multi-item check-and-reserve indivisible with respect to every other
//! hold, release, and reclaim. Used by the test suite and by the
//! `HOLD_STORE=memory` development mode.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{HoldOutcome, HoldStore, expiry_after};
use crate::domain::{HoldItem, ReservationId, ReservedLine, TicketTypeId};
use crate::error::GatewayError;

#[derive(Debug)]
struct HeldReservation {
    lines: Vec<ReservedLine>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HoldTable {
    held: HashMap<TicketTypeId, u32>,
    reservations: HashMap<ReservationId, HeldReservation>,
}

impl HoldTable {
    fn held(&self, ticket_type_id: TicketTypeId) -> u32 {
        self.held.get(&ticket_type_id).copied().unwrap_or(0)
    }

    fn give_back(&mut self, lines: &[ReservedLine]) {
        for line in lines {
            let remaining = self.held(line.ticket_type_id).saturating_sub(line.quantity);
            if remaining == 0 {
                self.held.remove(&line.ticket_type_id);
            } else {
                self.held.insert(line.ticket_type_id, remaining);
            }
        }
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>, limit: usize) -> usize {
        let expired: Vec<ReservationId> = self
            .reservations
            .iter()
            .filter(|(_, reservation)| reservation.expires_at <= now)
            .map(|(id, _)| *id)
            .take(limit)
            .collect();

        for id in &expired {
            if let Some(reservation) = self.reservations.remove(id) {
                self.give_back(&reservation.lines);
                tracing::info!(reservation_id = %id, "reclaimed expired reservation");
            }
        }
        expired.len()
    }
}

/// Mutex-guarded hold table.
#[derive(Debug, Default)]
pub struct InMemoryHoldStore {
    table: Mutex<HoldTable>,
}

impl InMemoryHoldStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn attempt_hold(
        &self,
        items: &[HoldItem],
        reservation_id: ReservationId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<HoldOutcome, GatewayError> {
        let mut table = self.table.lock().await;
        table.reclaim_expired(now, usize::MAX);

        if table.reservations.contains_key(&reservation_id) {
            return Err(GatewayError::HoldStoreError(format!(
                "reservation {reservation_id} already exists"
            )));
        }

        // Decide for every line before touching any counter.
        let mut lines: Vec<ReservedLine> = Vec::with_capacity(items.len());
        for item in items {
            let pending = lines
                .iter()
                .find(|line| line.ticket_type_id == item.ticket_type_id)
                .map_or(0, |line| line.quantity);
            let held = u64::from(table.held(item.ticket_type_id)) + u64::from(pending);
            let unsold = u64::from(item.total_quantity.saturating_sub(item.sold_quantity));
            if unsold.saturating_sub(held) < u64::from(item.requested) {
                return Ok(HoldOutcome::Insufficient {
                    ticket_type_id: item.ticket_type_id,
                });
            }
            match lines
                .iter_mut()
                .find(|line| line.ticket_type_id == item.ticket_type_id)
            {
                Some(line) => line.quantity = line.quantity.saturating_add(item.requested),
                None => lines.push(ReservedLine {
                    ticket_type_id: item.ticket_type_id,
                    quantity: item.requested,
                }),
            }
        }

        for line in &lines {
            let held = table.held(line.ticket_type_id).saturating_add(line.quantity);
            table.held.insert(line.ticket_type_id, held);
        }
        table.reservations.insert(
            reservation_id,
            HeldReservation {
                lines,
                expires_at: expiry_after(now, ttl),
            },
        );
        Ok(HoldOutcome::Held)
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ReservedLine>, GatewayError> {
        let mut table = self.table.lock().await;
        let Some(reservation) = table.reservations.remove(&reservation_id) else {
            return Ok(Vec::new());
        };
        table.give_back(&reservation.lines);
        Ok(reservation.lines)
    }

    async fn held_quantity(&self, ticket_type_id: TicketTypeId) -> Result<u32, GatewayError> {
        Ok(self.table.lock().await.held(ticket_type_id))
    }

    async fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Vec<ReservedLine>>, GatewayError> {
        let table = self.table.lock().await;
        Ok(table
            .reservations
            .get(&reservation_id)
            .map(|reservation| reservation.lines.clone()))
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, GatewayError> {
        Ok(self.table.lock().await.reclaim_expired(now, limit))
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

//! Returning held capacity to availability.
//!
//! Three paths end a reservation without a sale: a checkout that fails after
//! its hold succeeded, a purchase the ledger refuses, and a reservation
//! whose TTL lapsed. The first two call [`Compensator::release`] directly.
//! Expiry is logical: the hold store stops counting a reservation once its
//! expiry passes (every hold attempt reclaims lapsed entries first), and the
//! sweeper spawned by [`Compensator::spawn_expiry_sweeper`] reclaims the
//! rest in batches.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{Reservation, ReservationId, ReservationPhase, ReservedLine};
use crate::error::GatewayError;
use crate::hold_store::HoldStore;

/// Reservations reclaimed per hold store call during a sweep.
pub const SWEEP_BATCH: usize = 100;

/// Releases holds and reclaims expired reservations.
#[derive(Debug, Clone)]
pub struct Compensator {
    hold_store: Arc<dyn HoldStore>,
}

impl Compensator {
    /// Creates a compensator over `hold_store`.
    #[must_use]
    pub fn new(hold_store: Arc<dyn HoldStore>) -> Self {
        Self { hold_store }
    }

    /// Returns a reservation's held units and moves it to
    /// [`ReservationPhase::Released`]. Releasing an already released
    /// reservation does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable;
    /// the reservation then stays in its current phase.
    pub async fn release(&self, reservation: &mut Reservation) -> Result<(), GatewayError> {
        if reservation.phase() == ReservationPhase::Released {
            return Ok(());
        }
        let returned = self.release_id(reservation.id()).await?;
        reservation.mark_released()?;
        tracing::info!(
            reservation_id = %reservation.id(),
            lines = returned.len(),
            "released reservation"
        );
        Ok(())
    }

    /// Releases a reservation by id. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    pub async fn release_id(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ReservedLine>, GatewayError> {
        self.hold_store.release(reservation_id).await
    }

    /// Reclaims every reservation whose expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the store is unreachable.
    /// Batches reclaimed before the failure stay reclaimed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, GatewayError> {
        let mut total = 0;
        loop {
            let reclaimed = self.hold_store.reclaim_expired(now, SWEEP_BATCH).await?;
            total += reclaimed;
            if reclaimed < SWEEP_BATCH {
                break;
            }
        }
        if total > 0 {
            tracing::info!(reclaimed = total, "expiry sweep reclaimed reservations");
        }
        Ok(total)
    }

    /// Runs [`Self::sweep_expired`] every `interval` until `shutdown` turns
    /// `true` or its sender is dropped.
    pub fn spawn_expiry_sweeper(
        self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_expired(Utc::now()).await {
                            tracing::warn!(error = %e, "expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("expiry sweeper stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::domain::{HoldItem, TicketTypeId};
    use crate::hold_store::InMemoryHoldStore;

    const TTL: Duration = Duration::from_secs(900);

    fn item(id: i64, requested: u32) -> HoldItem {
        HoldItem {
            ticket_type_id: TicketTypeId::new(id),
            total_quantity: 1_000,
            sold_quantity: 0,
            requested,
        }
    }

    async fn hold(store: &InMemoryHoldStore, id: ReservationId, at: DateTime<Utc>) {
        let Ok(outcome) = store.attempt_hold(&[item(1, 2), item(2, 1)], id, TTL, at).await else {
            panic!("attempt_hold failed");
        };
        assert!(outcome.is_held());
    }

    async fn held(store: &InMemoryHoldStore, id: i64) -> u32 {
        let Ok(held) = store.held_quantity(TicketTypeId::new(id)).await else {
            panic!("held_quantity failed");
        };
        held
    }

    #[tokio::test]
    async fn release_restores_every_line() {
        let store = Arc::new(InMemoryHoldStore::new());
        let compensator = Compensator::new(store.clone());
        let id = ReservationId::new();
        hold(&store, id, Utc::now()).await;

        let mut reservation = Reservation::recovered(
            id,
            vec![ReservedLine {
                ticket_type_id: TicketTypeId::new(1),
                quantity: 2,
            }],
        );
        assert_ok!(compensator.release(&mut reservation).await);
        assert_eq!(reservation.phase(), ReservationPhase::Released);
        assert_eq!(held(&store, 1).await, 0);
        assert_eq!(held(&store, 2).await, 0);

        // Second release is a no-op, not an invalid transition.
        assert_ok!(compensator.release(&mut reservation).await);
    }

    #[tokio::test]
    async fn sweep_reclaims_in_batches() {
        let store = Arc::new(InMemoryHoldStore::new());
        let compensator = Compensator::new(store.clone());
        // Taken first: a hold attempt at the current time would reclaim the
        // backdated ones inline.
        let live = ReservationId::new();
        hold(&store, live, Utc::now()).await;
        let past = Utc::now() - chrono::Duration::hours(1);
        for _ in 0..(SWEEP_BATCH + 5) {
            hold(&store, ReservationId::new(), past).await;
        }

        assert_eq!(compensator.sweep_expired(Utc::now()).await.ok(), Some(SWEEP_BATCH + 5));
        assert_eq!(held(&store, 1).await, 2);
        assert!(matches!(store.reservation(live).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let store = Arc::new(InMemoryHoldStore::new());
        let past = Utc::now() - chrono::Duration::hours(1);
        hold(&store, ReservationId::new(), past).await;

        let (tx, rx) = watch::channel(false);
        let handle = Compensator::new(store.clone())
            .spawn_expiry_sweeper(Duration::from_millis(10), rx);

        // The first tick fires immediately.
        for _ in 0..50 {
            if held(&store, 1).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(held(&store, 1).await, 0);

        assert!(tx.send(true).is_ok());
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}

//! Read-only availability view for the cart UI.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::Compensator;
use crate::domain::{Availability, TicketTypeId};
use crate::error::GatewayError;
use crate::hold_store::HoldStore;
use crate::persistence::Ledger;

/// Reachability of the two stores every checkout depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Readiness {
    /// The ledger answered a ping.
    pub ledger: bool,
    /// The hold store answered a ping.
    pub hold_store: bool,
}

impl Readiness {
    /// Returns `true` when checkouts can be served.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        self.ledger && self.hold_store
    }
}

/// Combines ledger counters with live holds.
#[derive(Debug, Clone)]
pub struct AvailabilityService {
    ledger: Arc<dyn Ledger>,
    hold_store: Arc<dyn HoldStore>,
    compensator: Compensator,
}

impl AvailabilityService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        hold_store: Arc<dyn HoldStore>,
        compensator: Compensator,
    ) -> Self {
        Self {
            ledger,
            hold_store,
            compensator,
        }
    }

    /// Current availability of one ticket type. Lapsed reservations are
    /// reclaimed first so they never count as held.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::TicketTypeNotFound`] for an unknown id, or a
    /// store error.
    pub async fn availability(
        &self,
        ticket_type_id: TicketTypeId,
    ) -> Result<Availability, GatewayError> {
        let Some(ticket_type) = self.ledger.ticket_type(ticket_type_id).await? else {
            return Err(GatewayError::TicketTypeNotFound(ticket_type_id));
        };
        self.compensator.sweep_expired(Utc::now()).await?;
        let held = self.hold_store.held_quantity(ticket_type_id).await?;
        Ok(Availability::new(&ticket_type, held))
    }

    /// Pings the ledger and the hold store concurrently.
    pub async fn readiness(&self) -> Readiness {
        let (ledger, hold_store) = tokio::join!(self.ledger.ping(), self.hold_store.ping());
        if let Err(e) = &ledger {
            tracing::warn!(error = %e, "ledger unreachable");
        }
        if let Err(e) = &hold_store {
            tracing::warn!(error = %e, "hold store unreachable");
        }
        Readiness {
            ledger: ledger.is_ok(),
            hold_store: hold_store.is_ok(),
        }
    }
}

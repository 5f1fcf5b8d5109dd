//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::{AvailabilityService, FulfillmentReconciler, ReservationCoordinator};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Checkout orchestration.
    pub coordinator: Arc<ReservationCoordinator>,
    /// Payment notification handling and purchase lookup.
    pub reconciler: Arc<FulfillmentReconciler>,
    /// Availability reads.
    pub availability: Arc<AvailabilityService>,
}

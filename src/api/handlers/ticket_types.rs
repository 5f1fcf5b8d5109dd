//! Ticket type availability.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{Availability, TicketTypeId};
use crate::error::{ErrorResponse, GatewayError};

/// `GET /ticket-types/{id}/availability`: Live availability.
///
/// # Errors
///
/// Returns [`GatewayError::TicketTypeNotFound`] for an unknown id.
#[utoipa::path(
    get,
    path = "/api/v1/ticket-types/{id}/availability",
    tag = "Inventory",
    summary = "Ticket type availability",
    description = "Capacity, durably sold units, units held by unexpired reservations, and what a new checkout could hold now.",
    params(("id" = i64, Path, description = "Ticket type id")),
    responses(
        (status = 200, description = "Availability snapshot", body = Availability),
        (status = 404, description = "Unknown ticket type", body = ErrorResponse),
    )
)]
pub async fn availability(
    State(state): State<AppState>,
    Path(id): Path<TicketTypeId>,
) -> Result<impl IntoResponse, GatewayError> {
    let view = state.availability.availability(id).await?;
    Ok(Json(view))
}

/// Ticket type routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ticket-types/{id}/availability", get(availability))
}

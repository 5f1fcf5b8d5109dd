//! Checkout handler: hold a cart and open a payment session.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{CheckoutRequest, CheckoutResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /checkout`: Reserve tickets and start payment.
///
/// # Errors
///
/// Returns [`GatewayError`] per the checkout failure taxonomy.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    tag = "Checkout",
    summary = "Reserve tickets and create a payment session",
    description = "Atomically holds every line of the cart and returns the hosted payment page. The hold lapses at `expires_at` unless payment completes.",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Tickets held; redirect the buyer to `url`", body = CheckoutResponse),
        (status = 400, description = "Malformed cart or multi-event cart", body = ErrorResponse),
        (status = 404, description = "Unknown ticket type", body = ErrorResponse),
        (status = 409, description = "Not enough tickets available", body = ErrorResponse),
        (status = 500, description = "Store or payment gateway unavailable", body = ErrorResponse),
    )
)]
pub async fn checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let receipt = state.coordinator.checkout(req.into()).await?;
    Ok(Json(CheckoutResponse::from(receipt)))
}

/// Checkout routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/checkout", post(checkout))
}

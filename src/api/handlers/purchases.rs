//! Purchase lookup for the payment success page.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::PurchaseResponse;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /purchases/session/{session_id}`: Purchase by payment session.
///
/// # Errors
///
/// Returns [`GatewayError::PurchaseNotFound`] until the payment has been
/// reconciled.
#[utoipa::path(
    get,
    path = "/api/v1/purchases/session/{session_id}",
    tag = "Purchases",
    summary = "Look up a purchase by payment session",
    description = "Returns the purchase and its issued tickets once the completion notification has been processed.",
    params(("session_id" = String, Path, description = "Payment session id")),
    responses(
        (status = 200, description = "Purchase with tickets", body = PurchaseResponse),
        (status = 404, description = "No purchase for this session yet", body = ErrorResponse),
    )
)]
pub async fn purchase_by_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let details = state.reconciler.purchase_by_session(&session_id).await?;
    Ok(Json(PurchaseResponse::from(details)))
}

/// Purchase routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/purchases/session/{session_id}", get(purchase_by_session))
}

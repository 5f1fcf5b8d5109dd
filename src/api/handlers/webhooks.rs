//! Payment gateway webhook.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::WebhookAck;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};
use crate::payment::SIGNATURE_HEADER;

/// Largest notification body accepted.
pub const MAX_WEBHOOK_BODY: usize = 64 * 1024;

/// `POST /webhooks/payments`: Payment completion notifications.
///
/// # Errors
///
/// Returns 401 for a bad signature and a 5xx status when the gateway should
/// redeliver.
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "Webhooks",
    summary = "Receive payment gateway notifications",
    description = "Verifies the `Stripe-Signature` header over the raw body, then fulfils completed checkouts. Redeliveries of an already fulfilled checkout are acknowledged without effect.",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Notification processed or ignored", body = WebhookAck),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 500, description = "Processing failed; redeliver", body = ErrorResponse),
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let result = state.reconciler.handle_notification(&body, signature).await?;
    Ok(Json(WebhookAck {
        received: true,
        result,
    }))
}

/// Webhook routes mounted at the root level with their own body limit.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/payments", post(payment_webhook))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY))
}

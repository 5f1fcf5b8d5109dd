//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Buyer-facing endpoints are mounted under `/api/v1`; the payment webhook
//! and health check sit at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "boxoffice-gateway",
        description = "Ticket checkout: atomic inventory holds, payment handoff, idempotent fulfillment."
    ),
    paths(
        handlers::checkout::checkout,
        handlers::webhooks::payment_webhook,
        handlers::ticket_types::availability,
        handlers::purchases::purchase_by_session,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::CheckoutRequest,
        dto::CheckoutResponse,
        dto::PurchaseResponse,
        dto::WebhookAck,
        crate::service::NotificationOutcome,
        crate::domain::Availability,
        crate::domain::CartItem,
        crate::domain::IssuedTicket,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        handlers::system::HealthResponse,
    ))
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::webhooks::routes())
        .merge(handlers::system::routes())
}

//! REST endpoint handlers organized by resource.

pub mod checkout;
pub mod purchases;
pub mod system;
pub mod ticket_types;
pub mod webhooks;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(checkout::routes())
        .merge(ticket_types::routes())
        .merge(purchases::routes())
}

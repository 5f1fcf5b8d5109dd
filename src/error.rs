//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the checkout engine. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response, so checkout failures surface a distinct status per category and
//! payment notifications that fail for transient reasons return a status the
//! gateway will redeliver.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ReservationId, TicketTypeId};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "insufficient inventory for ticket type 6",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category            | HTTP Status                  |
/// |-----------|---------------------|------------------------------|
/// | 1000–1999 | Validation          | 400 Bad Request              |
/// | 2000–2999 | Not Found/Conflict  | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server              | 500 Internal Server Error    |
/// | 4000–4999 | Authentication      | 401 Unauthorized             |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The cart or request is malformed (empty cart, zero quantity,
    /// tickets from more than one event).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A requested ticket type does not exist in the ledger.
    #[error("ticket type not found: {0}")]
    TicketTypeNotFound(TicketTypeId),

    /// The atomic hold attempt found a line item without enough stock.
    #[error("insufficient inventory for ticket type {0}")]
    InsufficientInventory(TicketTypeId),

    /// A purchase looked up by gateway session does not exist.
    #[error("purchase not found for session {0}")]
    PurchaseNotFound(String),

    /// Payment notification signature did not verify.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Ledger (PostgreSQL) failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Hold store failure.
    #[error("hold store error: {0}")]
    HoldStoreError(String),

    /// Outbound call to the payment gateway failed.
    #[error("payment gateway error: {0}")]
    PaymentGatewayError(String),

    /// A reservation was driven through an illegal lifecycle transition.
    #[error("reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Reservation being advanced.
        reservation_id: ReservationId,
        /// Current phase.
        from: &'static str,
        /// Requested phase.
        to: &'static str,
    },

    /// Internal server error (malformed gateway metadata and the like).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidInput(_) => 1001,
            Self::TicketTypeNotFound(_) => 2001,
            Self::InsufficientInventory(_) => 2002,
            Self::PurchaseNotFound(_) => 2003,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::HoldStoreError(_) => 3002,
            Self::PaymentGatewayError(_) => 3003,
            Self::InvalidTransition { .. } => 3004,
            Self::Unauthorized(_) => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TicketTypeNotFound(_) | Self::PurchaseNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientInventory(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PersistenceError(_)
            | Self::HoldStoreError(_)
            | Self::PaymentGatewayError(_)
            | Self::InvalidTransition { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` when a payment notification that failed with this
    /// error should be redelivered by the gateway.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_)
                | Self::HoldStoreError(_)
                | Self::PaymentGatewayError(_)
                | Self::Internal(_)
        )
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::HoldStoreError(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(
            GatewayError::InvalidInput("empty cart".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::TicketTypeNotFound(TicketTypeId::new(7)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::InsufficientInventory(TicketTypeId::new(7)).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::Unauthorized("bad signature".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::HoldStoreError("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(GatewayError::PersistenceError("timeout".into()).is_retryable());
        assert!(GatewayError::HoldStoreError("timeout".into()).is_retryable());
        assert!(!GatewayError::Unauthorized("bad signature".into()).is_retryable());
        assert!(!GatewayError::InvalidInput("empty".into()).is_retryable());
    }

    #[test]
    fn message_includes_ticket_type() {
        let err = GatewayError::InsufficientInventory(TicketTypeId::new(6));
        assert_eq!(err.to_string(), "insufficient inventory for ticket type 6");
        assert_eq!(err.error_code(), 2002);
    }
}

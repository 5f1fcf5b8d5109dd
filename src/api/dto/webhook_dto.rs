//! Payment notification acknowledgement.

use serde::Serialize;
use utoipa::ToSchema;

use crate::service::NotificationOutcome;

/// Response body for `POST /webhooks/payments`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAck {
    /// Always `true`; the gateway only checks the status code.
    pub received: bool,
    /// What the notification did.
    pub result: NotificationOutcome,
}

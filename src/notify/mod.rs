//! Buyer confirmations.
//!
//! A confirmation is sent after fulfillment has committed. Delivery is best
//! effort: the caller logs a failed send and moves on, the sale stands.

use std::fmt;

use async_trait::async_trait;

use crate::domain::{EventId, PurchaseId};
use crate::error::GatewayError;

/// One ticket line in a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTicket {
    /// Ticket type display name.
    pub ticket_type_name: String,
    /// Scan code.
    pub code: String,
}

/// What the buyer is told after a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Recipient.
    pub email: String,
    /// Settled purchase.
    pub purchase_id: PurchaseId,
    /// Event attended.
    pub event_id: EventId,
    /// Issued tickets.
    pub tickets: Vec<ConfirmedTicket>,
}

/// Delivers confirmations to buyers.
#[async_trait]
pub trait ConfirmationSender: Send + Sync + fmt::Debug {
    /// Sends one confirmation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refused the message.
    async fn send(&self, confirmation: &Confirmation) -> Result<(), GatewayError>;
}

/// Writes confirmations to the log instead of a mail transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfirmationSender;

#[async_trait]
impl ConfirmationSender for LogConfirmationSender {
    async fn send(&self, confirmation: &Confirmation) -> Result<(), GatewayError> {
        let codes: Vec<&str> = confirmation
            .tickets
            .iter()
            .map(|t| t.code.as_str())
            .collect();
        tracing::info!(
            purchase_id = %confirmation.purchase_id,
            event_id = %confirmation.event_id,
            recipient = %confirmation.email,
            tickets = ?codes,
            "purchase confirmation dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sender_always_succeeds() {
        let confirmation = Confirmation {
            email: "ana@example.com".to_string(),
            purchase_id: PurchaseId::new(1),
            event_id: EventId::new(2),
            tickets: vec![ConfirmedTicket {
                ticket_type_name: "General".to_string(),
                code: "TKT-1-3-abc".to_string(),
            }],
        };
        assert!(LogConfirmationSender.send(&confirmation).await.is_ok());
    }
}

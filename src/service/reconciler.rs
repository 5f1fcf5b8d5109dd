//! Payment completion handling.
//!
//! The gateway may deliver the same completion notification any number of
//! times, concurrently or after a crash. Fulfillment is therefore keyed on
//! the purchase row: the first delivery commits the sale in one ledger
//! transaction, every later one observes the settled status and writes
//! nothing. Held units are returned only after the sale is durable, so
//! there is no instant where the units are neither sold nor held.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::{Compensator, TicketCodeGenerator};
use crate::domain::{
    PurchaseDetails, PurchaseId, Reservation, ReservedLine, SessionMetadata, TicketTypeId,
};
use crate::error::GatewayError;
use crate::notify::{Confirmation, ConfirmationSender, ConfirmedTicket};
use crate::payment::{CompletedSession, GatewayNotification, WebhookVerifier};
use crate::persistence::{
    FulfilledPurchase, FulfilmentOutcome, FulfilmentRequest, Ledger, NewTicket,
};

/// What a notification did. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// The sale was committed and tickets issued.
    Fulfilled {
        /// Settled purchase.
        purchase_id: PurchaseId,
        /// Tickets issued.
        tickets_issued: usize,
    },
    /// A previous delivery already committed the sale.
    AlreadyFulfilled {
        /// Settled purchase.
        purchase_id: PurchaseId,
    },
    /// The purchase could not be honored and is marked failed.
    Rejected {
        /// Failed purchase.
        purchase_id: PurchaseId,
        /// Ticket type without capacity, if this delivery found it.
        ticket_type_id: Option<TicketTypeId>,
    },
    /// The event type needs no action.
    Ignored {
        /// The event's type.
        event_type: String,
    },
}

/// Reconciles completed payments into sold inventory.
#[derive(Debug, Clone)]
pub struct FulfillmentReconciler {
    ledger: Arc<dyn Ledger>,
    compensator: Compensator,
    verifier: WebhookVerifier,
    codes: Arc<dyn TicketCodeGenerator>,
    confirmations: Arc<dyn ConfirmationSender>,
}

impl FulfillmentReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        compensator: Compensator,
        verifier: WebhookVerifier,
        codes: Arc<dyn TicketCodeGenerator>,
        confirmations: Arc<dyn ConfirmationSender>,
    ) -> Self {
        Self {
            ledger,
            compensator,
            verifier,
            codes,
            confirmations,
        }
    }

    /// Verifies, decodes, and applies one raw notification.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Unauthorized`] if the signature is missing or wrong.
    ///   Nothing was read from the payload.
    /// - [`GatewayError::InvalidInput`] or [`GatewayError::Internal`] if the
    ///   verified payload cannot be decoded.
    /// - A retryable error if the ledger transaction failed; nothing was
    ///   committed and the holds are untouched.
    pub async fn handle_notification(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<NotificationOutcome, GatewayError> {
        let Some(signature) = signature else {
            return Err(GatewayError::Unauthorized(
                "missing signature header".to_string(),
            ));
        };
        self.verifier.verify(payload, signature, Utc::now())?;

        match GatewayNotification::parse(payload)? {
            GatewayNotification::CheckoutCompleted(session) => self.fulfil(session).await,
            GatewayNotification::Ignored { event_type } => {
                tracing::debug!(%event_type, "ignoring payment notification");
                Ok(NotificationOutcome::Ignored { event_type })
            }
        }
    }

    /// Applies an already verified completed session.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the ledger transaction failed.
    pub async fn fulfil(
        &self,
        session: CompletedSession,
    ) -> Result<NotificationOutcome, GatewayError> {
        let metadata = session.metadata;
        let purchase_id = metadata.purchase_id;
        let mut reservation = Reservation::recovered(
            metadata.reservation_id,
            metadata
                .lines
                .iter()
                .map(|line| ReservedLine {
                    ticket_type_id: line.ticket_type_id,
                    quantity: line.quantity,
                })
                .collect(),
        );

        let request = self.fulfilment_request(&metadata, session.session_id);
        let outcome = match self.ledger.fulfil_purchase(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    %purchase_id,
                    reservation_id = %reservation.id(),
                    error = %e,
                    "fulfillment transaction failed"
                );
                return Err(e);
            }
        };

        match outcome {
            FulfilmentOutcome::Fulfilled(done) => {
                reservation.mark_purchased()?;
                tracing::info!(
                    %purchase_id,
                    reservation_id = %reservation.id(),
                    tickets = done.tickets.len(),
                    "purchase fulfilled"
                );
                self.release_after_settlement(&mut reservation).await;
                let tickets_issued = done.tickets.len();
                self.dispatch_confirmation(done).await;
                Ok(NotificationOutcome::Fulfilled {
                    purchase_id,
                    tickets_issued,
                })
            }
            FulfilmentOutcome::AlreadyFulfilled => {
                // An earlier delivery may have stopped between commit and release.
                reservation.mark_purchased()?;
                tracing::info!(%purchase_id, "duplicate completion notification");
                self.release_after_settlement(&mut reservation).await;
                Ok(NotificationOutcome::AlreadyFulfilled { purchase_id })
            }
            FulfilmentOutcome::CapacityExhausted { ticket_type_id } => {
                tracing::warn!(
                    %purchase_id,
                    %ticket_type_id,
                    reservation_id = %reservation.id(),
                    "paid after reservation lapsed and capacity was resold; purchase marked failed"
                );
                self.release_after_settlement(&mut reservation).await;
                Ok(NotificationOutcome::Rejected {
                    purchase_id,
                    ticket_type_id: Some(ticket_type_id),
                })
            }
            FulfilmentOutcome::AlreadyRejected => {
                self.release_after_settlement(&mut reservation).await;
                Ok(NotificationOutcome::Rejected {
                    purchase_id,
                    ticket_type_id: None,
                })
            }
        }
    }

    /// Looks up a purchase and its tickets by gateway session id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PurchaseNotFound`] if no purchase carries the
    /// session id.
    pub async fn purchase_by_session(
        &self,
        session_id: &str,
    ) -> Result<PurchaseDetails, GatewayError> {
        self.ledger
            .purchase_by_session(session_id)
            .await?
            .ok_or_else(|| GatewayError::PurchaseNotFound(session_id.to_string()))
    }

    fn fulfilment_request(
        &self,
        metadata: &SessionMetadata,
        session_id: String,
    ) -> FulfilmentRequest {
        let tickets = metadata
            .lines
            .iter()
            .flat_map(|line| (0..line.quantity).map(move |_| line.ticket_type_id))
            .map(|ticket_type_id| NewTicket {
                ticket_type_id,
                code: self.codes.next_code(metadata.purchase_id, ticket_type_id),
            })
            .collect();

        FulfilmentRequest {
            purchase_id: metadata.purchase_id,
            user_id: metadata.user_id,
            session_id,
            lines: metadata.lines.clone(),
            tickets,
        }
    }

    /// Returns the held units once the purchase is settled either way. A
    /// failure leaves the reservation to lapse at its expiry.
    async fn release_after_settlement(&self, reservation: &mut Reservation) {
        if let Err(e) = self.compensator.release(reservation).await {
            tracing::warn!(
                reservation_id = %reservation.id(),
                error = %e,
                "hold release after settlement failed; expiry will reclaim it"
            );
        }
    }

    async fn dispatch_confirmation(&self, done: FulfilledPurchase) {
        let confirmation = Confirmation {
            email: done.purchaser_email,
            purchase_id: done.purchase_id,
            event_id: done.event_id,
            tickets: done
                .tickets
                .into_iter()
                .map(|t| ConfirmedTicket {
                    ticket_type_name: t.ticket_type_name,
                    code: t.code,
                })
                .collect(),
        };
        if let Err(e) = self.confirmations.send(&confirmation).await {
            tracing::warn!(
                purchase_id = %confirmation.purchase_id,
                error = %e,
                "confirmation dispatch failed"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::PaymentStatus;
    use crate::service::test_support::{RecordingSender, Shop};
    use crate::hold_store::HoldStore;

    #[tokio::test]
    async fn completion_sells_issues_and_releases() {
        let shop = Shop::open().await;
        let ga = shop.ticket_type("General", 10, 0).await;
        let receipt = shop.checkout(&[(ga, 3)]).await;
        assert_eq!(shop.held(ga).await, 3);

        let outcome = shop.pay(&receipt.session_id).await;
        assert_eq!(
            outcome.ok(),
            Some(NotificationOutcome::Fulfilled {
                purchase_id: receipt.purchase_id,
                tickets_issued: 3,
            })
        );
        assert_eq!(shop.row(ga).await.sold_quantity, 3);
        assert_eq!(shop.held(ga).await, 0);
        assert_eq!(shop.holds.reservation(receipt.reservation_id).await.ok(), Some(None));

        let sent = shop.confirmations.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent.first().map(|c| c.tickets.len()), Some(3));
    }

    #[tokio::test]
    async fn missing_or_bad_signature_changes_nothing() {
        let shop = Shop::open().await;
        let ga = shop.ticket_type("General", 10, 0).await;
        let receipt = shop.checkout(&[(ga, 1)]).await;
        let (payload, _) = shop.completion(&receipt.session_id).await;

        let missing = shop.reconciler.handle_notification(&payload, None).await;
        assert!(matches!(missing, Err(GatewayError::Unauthorized(_))));

        let forged = WebhookVerifier::new("whsec_attacker", Duration::from_secs(300));
        let Ok(signature) = forged.sign(&payload, Utc::now().timestamp()) else {
            panic!("sign failed");
        };
        let bad = shop
            .reconciler
            .handle_notification(&payload, Some(&signature))
            .await;
        assert!(matches!(bad, Err(GatewayError::Unauthorized(_))));

        assert_eq!(shop.row(ga).await.sold_quantity, 0);
        assert_eq!(shop.held(ga).await, 1);
    }

    #[tokio::test]
    async fn ledger_failure_is_retryable_and_keeps_the_hold() {
        let shop = Shop::open().await;
        let ga = shop.ticket_type("General", 10, 0).await;
        let receipt = shop.checkout(&[(ga, 2)]).await;

        shop.ledger.fail_fulfilments(true);
        let Err(err) = shop.pay(&receipt.session_id).await else {
            panic!("expected failure");
        };
        assert!(err.is_retryable());
        assert_eq!(shop.held(ga).await, 2);
        assert_eq!(shop.row(ga).await.sold_quantity, 0);

        shop.ledger.fail_fulfilments(false);
        assert!(matches!(
            shop.pay(&receipt.session_id).await,
            Ok(NotificationOutcome::Fulfilled { .. })
        ));
        assert_eq!(shop.held(ga).await, 0);
    }

    #[tokio::test]
    async fn confirmation_failure_does_not_undo_the_sale() {
        let sender = RecordingSender {
            fail: true,
            ..RecordingSender::default()
        };
        let shop = Shop::with_sender(sender, Duration::from_secs(900)).await;
        let ga = shop.ticket_type("General", 10, 0).await;
        let receipt = shop.checkout(&[(ga, 1)]).await;

        assert!(matches!(
            shop.pay(&receipt.session_id).await,
            Ok(NotificationOutcome::Fulfilled { .. })
        ));
        assert_eq!(shop.row(ga).await.sold_quantity, 1);
    }

    #[tokio::test]
    async fn late_payment_after_resale_is_rejected() {
        // Lapsed at once: the second buyer can hold the units again.
        let shop = Shop::with_sender(RecordingSender::default(), Duration::ZERO).await;
        let ga = shop.ticket_type("General", 2, 0).await;
        let first = shop.checkout(&[(ga, 2)]).await;
        let second = shop.checkout(&[(ga, 2)]).await;

        assert!(matches!(
            shop.pay(&second.session_id).await,
            Ok(NotificationOutcome::Fulfilled { .. })
        ));
        let outcome = shop.pay(&first.session_id).await;
        assert_eq!(
            outcome.ok(),
            Some(NotificationOutcome::Rejected {
                purchase_id: first.purchase_id,
                ticket_type_id: Some(ga),
            })
        );
        assert_eq!(shop.row(ga).await.sold_quantity, 2);

        let Ok(Some(purchase)) = shop.ledger.purchase(first.purchase_id).await else {
            panic!("purchase missing");
        };
        assert_eq!(purchase.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn door_sales_during_payment_reject_the_completion() {
        let shop = Shop::open().await;
        let ga = shop.ticket_type("General", 3, 0).await;
        let receipt = shop.checkout(&[(ga, 2)]).await;

        // Sold at the door, outside any hold, while the buyer was paying.
        shop.ledger.set_sold_quantity(ga, 2).await;

        let outcome = shop.pay(&receipt.session_id).await;
        assert_eq!(
            outcome.ok(),
            Some(NotificationOutcome::Rejected {
                purchase_id: receipt.purchase_id,
                ticket_type_id: Some(ga),
            })
        );
        assert_eq!(shop.row(ga).await.sold_quantity, 2);
        assert!(shop.ledger.tickets_for(receipt.purchase_id).await.is_empty());
        assert!(shop.confirmations.sent.lock().await.is_empty());
        assert_eq!(shop.held(ga).await, 0);
    }

    #[tokio::test]
    async fn unrelated_events_are_acknowledged() {
        let shop = Shop::open().await;
        let payload = br#"{"type":"charge.refunded","data":{"object":{}}}"#;
        let Ok(signature) = shop.verifier.sign(payload, Utc::now().timestamp()) else {
            panic!("sign failed");
        };
        assert_eq!(
            shop.reconciler
                .handle_notification(payload, Some(&signature))
                .await
                .ok(),
            Some(NotificationOutcome::Ignored {
                event_type: "charge.refunded".to_string()
            })
        );
    }

    #[tokio::test]
    async fn purchase_lookup_by_session() {
        let shop = Shop::open().await;
        let ga = shop.ticket_type("General", 10, 0).await;
        let receipt = shop.checkout(&[(ga, 2)]).await;
        assert!(matches!(
            shop.reconciler.purchase_by_session(&receipt.session_id).await,
            Err(GatewayError::PurchaseNotFound(_))
        ));

        assert!(shop.pay(&receipt.session_id).await.is_ok());
        let Ok(details) = shop.reconciler.purchase_by_session(&receipt.session_id).await else {
            panic!("purchase not found");
        };
        assert_eq!(details.purchase.id, receipt.purchase_id);
        assert_eq!(details.tickets.len(), 2);
    }
}

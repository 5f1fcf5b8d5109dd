//! In-process wiring of every service for tests.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    AvailabilityService, CheckoutCommand, CheckoutReceipt, CheckoutSettings, Compensator,
    FulfillmentReconciler, NotificationOutcome, ReservationCoordinator, SequentialCodeGenerator,
};
use crate::domain::{CartItem, EventId, Money, TicketType, TicketTypeId};
use crate::error::GatewayError;
use crate::hold_store::{HoldStore, InMemoryHoldStore};
use crate::notify::{Confirmation, ConfirmationSender};
use crate::payment::{MockPaymentGateway, WebhookVerifier};
use crate::persistence::{InMemoryLedger, Ledger};

pub(crate) const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Records confirmations, optionally failing every send.
#[derive(Debug, Default)]
pub(crate) struct RecordingSender {
    pub(crate) sent: Mutex<Vec<Confirmation>>,
    pub(crate) fail: bool,
}

#[async_trait]
impl ConfirmationSender for RecordingSender {
    async fn send(&self, confirmation: &Confirmation) -> Result<(), GatewayError> {
        if self.fail {
            return Err(GatewayError::Internal("smtp unavailable".to_string()));
        }
        self.sent.lock().await.push(confirmation.clone());
        Ok(())
    }
}

pub(crate) struct Shop {
    pub(crate) ledger: Arc<InMemoryLedger>,
    pub(crate) holds: Arc<InMemoryHoldStore>,
    pub(crate) payments: Arc<MockPaymentGateway>,
    pub(crate) confirmations: Arc<RecordingSender>,
    pub(crate) verifier: WebhookVerifier,
    pub(crate) coordinator: ReservationCoordinator,
    pub(crate) reconciler: FulfillmentReconciler,
    pub(crate) availability: AvailabilityService,
    pub(crate) event_id: EventId,
}

impl Shop {
    pub(crate) async fn open() -> Self {
        Self::with_sender(RecordingSender::default(), Duration::from_secs(900)).await
    }

    pub(crate) async fn with_sender(sender: RecordingSender, ttl: Duration) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let holds = Arc::new(InMemoryHoldStore::new());
        let payments = Arc::new(MockPaymentGateway::new());
        let confirmations = Arc::new(sender);
        let verifier = WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300));
        let compensator = Compensator::new(holds.clone());

        let coordinator = ReservationCoordinator::new(
            ledger.clone(),
            holds.clone(),
            payments.clone(),
            compensator.clone(),
            CheckoutSettings {
                reservation_ttl: ttl,
                max_tickets_per_line: 20,
                currency: "aud".to_string(),
                success_url: "https://shop.test/ok".to_string(),
                cancel_url: "https://shop.test/cancel".to_string(),
            },
        );
        let reconciler = FulfillmentReconciler::new(
            ledger.clone(),
            compensator.clone(),
            verifier.clone(),
            Arc::new(SequentialCodeGenerator::new("TEST")),
            confirmations.clone(),
        );
        let availability =
            AvailabilityService::new(ledger.clone(), holds.clone(), compensator);
        let event_id = ledger.insert_event("Opening Night").await;

        Self {
            ledger,
            holds,
            payments,
            confirmations,
            verifier,
            coordinator,
            reconciler,
            availability,
            event_id,
        }
    }

    pub(crate) async fn ticket_type(&self, name: &str, total: u32, sold: u32) -> TicketTypeId {
        let Ok(id) = self
            .ledger
            .insert_ticket_type(self.event_id, name, Money::from_cents(2500), total, sold)
            .await
        else {
            panic!("insert_ticket_type failed");
        };
        id
    }

    pub(crate) fn command(items: &[(TicketTypeId, u32)]) -> CheckoutCommand {
        CheckoutCommand {
            email: "ana@example.com".to_string(),
            items: items
                .iter()
                .map(|&(ticket_type_id, quantity)| CartItem {
                    ticket_type_id,
                    quantity,
                })
                .collect(),
        }
    }

    pub(crate) async fn checkout(&self, items: &[(TicketTypeId, u32)]) -> CheckoutReceipt {
        match self.coordinator.checkout(Self::command(items)).await {
            Ok(receipt) => receipt,
            Err(e) => panic!("checkout failed: {e}"),
        }
    }

    /// Signed completion notification for a session.
    pub(crate) async fn completion(&self, session_id: &str) -> (Vec<u8>, String) {
        let Some(payload) = self.payments.completion_payload(session_id).await else {
            panic!("unknown session {session_id}");
        };
        let Ok(signature) = self.verifier.sign(&payload, Utc::now().timestamp()) else {
            panic!("sign failed");
        };
        (payload, signature)
    }

    pub(crate) async fn pay(&self, session_id: &str) -> Result<NotificationOutcome, GatewayError> {
        let (payload, signature) = self.completion(session_id).await;
        self.reconciler
            .handle_notification(&payload, Some(&signature))
            .await
    }

    pub(crate) async fn row(&self, id: TicketTypeId) -> TicketType {
        let Ok(Some(row)) = self.ledger.ticket_type(id).await else {
            panic!("ticket type {id} missing");
        };
        row
    }

    pub(crate) async fn held(&self, id: TicketTypeId) -> u32 {
        let Ok(held) = self.holds.held_quantity(id).await else {
            panic!("held_quantity failed");
        };
        held
    }
}

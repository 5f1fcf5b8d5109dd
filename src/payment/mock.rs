//! Deterministic in-process payment gateway.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::webhook::completion_event;
use super::{CheckoutSession, PaymentGateway, SessionRequest};
use crate::error::GatewayError;

/// Records session requests and hands out `cs_mock_<n>` sessions.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    next_session: AtomicU64,
    fail: AtomicBool,
    sessions: Mutex<Vec<(CheckoutSession, SessionRequest)>>,
}

impl MockPaymentGateway {
    /// Creates a gateway that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent session creations fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of sessions created so far.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// The request that created `session_id`.
    pub async fn request_for(&self, session_id: &str) -> Option<SessionRequest> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|(session, _)| session.id == session_id)
            .map(|(_, request)| request.clone())
    }

    /// The unsigned completion notification the gateway would send once the
    /// buyer pays for `session_id`.
    pub async fn completion_payload(&self, session_id: &str) -> Option<Vec<u8>> {
        let request = self.request_for(session_id).await?;
        Some(completion_event(
            session_id,
            &request.customer_email,
            &request.metadata,
        ))
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::PaymentGatewayError(
                "mock gateway is failing".to_string(),
            ));
        }
        let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let session = CheckoutSession {
            id: format!("cs_mock_{n}"),
            url: format!("https://checkout.mock/pay/cs_mock_{n}"),
        };
        self.sessions
            .lock()
            .await
            .push((session.clone(), request.clone()));
        Ok(session)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{
        EventId, Money, PurchaseId, PurchaseLine, ReservationId, SessionMetadata, TicketTypeId,
        UserId,
    };
    use crate::payment::GatewayNotification;

    fn request() -> SessionRequest {
        SessionRequest {
            line_items: Vec::new(),
            currency: "aud".to_string(),
            customer_email: "ana@example.com".to_string(),
            success_url: "https://shop.test/ok".to_string(),
            cancel_url: "https://shop.test/cancel".to_string(),
            metadata: SessionMetadata {
                purchase_id: PurchaseId::new(1),
                event_id: EventId::new(1),
                user_id: UserId::new(1),
                reservation_id: ReservationId::new(),
                lines: vec![PurchaseLine {
                    ticket_type_id: TicketTypeId::new(2),
                    quantity: 1,
                    unit_price: Money::from_cents(100),
                }],
            },
        }
    }

    #[tokio::test]
    async fn hands_out_distinct_sessions() {
        let gateway = MockPaymentGateway::new();
        let (Ok(a), Ok(b)) = (
            gateway.create_session(&request()).await,
            gateway.create_session(&request()).await,
        ) else {
            panic!("create_session failed");
        };
        assert_ne!(a.id, b.id);
        assert_eq!(gateway.session_count().await, 2);
    }

    #[tokio::test]
    async fn failing_gateway_records_nothing() {
        let gateway = MockPaymentGateway::new();
        gateway.set_failing(true);
        assert!(matches!(
            gateway.create_session(&request()).await,
            Err(GatewayError::PaymentGatewayError(_))
        ));
        assert_eq!(gateway.session_count().await, 0);
    }

    #[tokio::test]
    async fn completion_payload_echoes_metadata() {
        let gateway = MockPaymentGateway::new();
        let req = request();
        let Ok(session) = gateway.create_session(&req).await else {
            panic!("create_session failed");
        };
        let Some(payload) = gateway.completion_payload(&session.id).await else {
            panic!("no payload");
        };
        let Ok(GatewayNotification::CheckoutCompleted(done)) = GatewayNotification::parse(&payload)
        else {
            panic!("expected completed session");
        };
        assert_eq!(done.session_id, session.id);
        assert_eq!(done.metadata, req.metadata);
    }
}

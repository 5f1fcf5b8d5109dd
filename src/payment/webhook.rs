//! Inbound completion notifications.
//!
//! The gateway signs every notification with a shared secret. The header has
//! the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]` where each `v1` is
//! `HMAC-SHA256(secret, "<t>.<raw body>")`. Verification happens on the raw
//! bytes before any JSON decoding.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::SessionMetadata;
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Request header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Event type that triggers fulfillment.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Checks notification signatures against the webhook signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier accepting timestamps within `tolerance` of now.
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GatewayError::Internal(format!("webhook secret: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Builds a signature header for `payload` at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the secret cannot key the MAC.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, GatewayError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    /// Verifies `header` against `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] if the header is malformed,
    /// outside the tolerance window, or no signature matches.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let Some(timestamp) = timestamp else {
            return Err(GatewayError::Unauthorized(
                "signature header has no timestamp".to_string(),
            ));
        };
        if signatures.is_empty() {
            return Err(GatewayError::Unauthorized(
                "signature header has no v1 signature".to_string(),
            ));
        }

        if now.timestamp().abs_diff(timestamp) > self.tolerance.as_secs() {
            return Err(GatewayError::Unauthorized(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        for signature in &signatures {
            if self.mac(timestamp, payload)?.verify_slice(signature).is_ok() {
                return Ok(());
            }
        }
        Err(GatewayError::Unauthorized("no matching signature".to_string()))
    }
}

/// A completed checkout session as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    /// Gateway session identifier.
    pub session_id: String,
    /// Email the buyer paid with, if reported.
    pub customer_email: Option<String>,
    /// Correlation data attached at checkout.
    pub metadata: SessionMetadata,
}

/// A decoded, verified notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayNotification {
    /// Payment completed; fulfil the purchase.
    CheckoutCompleted(CompletedSession),
    /// Any other event type. Acknowledged without action.
    Ignored {
        /// The event's `type` field.
        event_type: String,
    },
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl GatewayNotification {
    /// Decodes a verified notification body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidInput`] if the body is not a gateway
    /// event, or [`GatewayError::Internal`] if a completed session carries
    /// metadata this service did not write.
    pub fn parse(payload: &[u8]) -> Result<Self, GatewayError> {
        let event: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidInput(format!("malformed event: {e}")))?;
        if event.event_type != CHECKOUT_COMPLETED {
            return Ok(Self::Ignored {
                event_type: event.event_type,
            });
        }

        let session: RawSession = serde_json::from_value(event.data.object)
            .map_err(|e| GatewayError::InvalidInput(format!("malformed session: {e}")))?;
        let customer_email = session
            .customer_email
            .or_else(|| session.customer_details.and_then(|d| d.email));
        Ok(Self::CheckoutCompleted(CompletedSession {
            session_id: session.id,
            customer_email,
            metadata: SessionMetadata::from_map(&session.metadata)?,
        }))
    }
}

/// Renders the body the gateway sends when `session_id` completes.
#[must_use]
pub fn completion_event(
    session_id: &str,
    customer_email: &str,
    metadata: &SessionMetadata,
) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{session_id}"),
        "type": CHECKOUT_COMPLETED,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "customer_email": customer_email,
                "payment_status": "paid",
                "metadata": metadata.to_map(),
            }
        }
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{
        EventId, Money, PurchaseId, PurchaseLine, ReservationId, TicketTypeId, UserId,
    };

    const SECRET: &str = "whsec_test";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET, Duration::from_secs(300))
    }

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            purchase_id: PurchaseId::new(7),
            event_id: EventId::new(1),
            user_id: UserId::new(3),
            reservation_id: ReservationId::new(),
            lines: vec![PurchaseLine {
                ticket_type_id: TicketTypeId::new(5),
                quantity: 2,
                unit_price: Money::from_cents(2500),
            }],
        }
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let now = Utc::now();
        let Ok(header) = verifier().sign(b"{}", now.timestamp()) else {
            panic!("sign failed");
        };
        assert!(verifier().verify(b"{}", &header, now).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = Utc::now();
        let Ok(header) = verifier().sign(b"{\"a\":1}", now.timestamp()) else {
            panic!("sign failed");
        };
        assert!(matches!(
            verifier().verify(b"{\"a\":2}", &header, now),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = Utc::now();
        let other = WebhookVerifier::new("whsec_other", Duration::from_secs(300));
        let Ok(header) = other.sign(b"{}", now.timestamp()) else {
            panic!("sign failed");
        };
        assert!(verifier().verify(b"{}", &header, now).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let now = Utc::now();
        let Ok(header) = verifier().sign(b"{}", now.timestamp() - 301) else {
            panic!("sign failed");
        };
        assert!(matches!(
            verifier().verify(b"{}", &header, now),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        let now = Utc::now();
        for header in ["", "v1=abcd", "t=123", "t=abc,v1=00", "garbage"] {
            assert!(
                matches!(
                    verifier().verify(b"{}", header, now),
                    Err(GatewayError::Unauthorized(_))
                ),
                "accepted {header:?}"
            );
        }
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let now = Utc::now();
        let Ok(header) = verifier().sign(b"{}", now.timestamp()) else {
            panic!("sign failed");
        };
        let Some((t, v1)) = header.split_once(',') else {
            panic!("unexpected header {header}");
        };
        let rotated = format!("{t},v1=deadbeef,{v1}");
        assert!(verifier().verify(b"{}", &rotated, now).is_ok());
    }

    #[test]
    fn parses_completed_session() {
        let metadata = metadata();
        let payload = completion_event("cs_test_1", "ana@example.com", &metadata);
        let Ok(GatewayNotification::CheckoutCompleted(session)) =
            GatewayNotification::parse(&payload)
        else {
            panic!("expected a completed session");
        };
        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(session.customer_email.as_deref(), Some("ana@example.com"));
        assert_eq!(session.metadata, metadata);
    }

    #[test]
    fn other_events_are_ignored() {
        let payload = br#"{"type":"payment_intent.created","data":{"object":{}}}"#;
        assert_eq!(
            GatewayNotification::parse(payload).ok(),
            Some(GatewayNotification::Ignored {
                event_type: "payment_intent.created".to_string()
            })
        );
    }

    #[test]
    fn falls_back_to_customer_details_email() {
        let mut map = metadata().to_map();
        map.insert("ignored_extra".to_string(), "x".to_string());
        let payload = serde_json::json!({
            "type": CHECKOUT_COMPLETED,
            "data": {"object": {
                "id": "cs_2",
                "customer_details": {"email": "bo@example.com"},
                "metadata": map,
            }}
        })
        .to_string();
        let Ok(GatewayNotification::CheckoutCompleted(session)) =
            GatewayNotification::parse(payload.as_bytes())
        else {
            panic!("expected a completed session");
        };
        assert_eq!(session.customer_email.as_deref(), Some("bo@example.com"));
    }

    #[test]
    fn malformed_body_is_invalid_input() {
        assert!(matches!(
            GatewayNotification::parse(b"not json"),
            Err(GatewayError::InvalidInput(_))
        ));
    }
}

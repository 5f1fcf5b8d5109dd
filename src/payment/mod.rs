//! External payment gateway integration.
//!
//! The gateway owns the buyer-facing payment page. This service only creates
//! a session for a held reservation and later consumes the signed
//! completion notification, so both directions are modelled here:
//!
//! - [`PaymentGateway`]: outbound session creation ([`StripeGateway`] in
//!   production, [`MockPaymentGateway`] for tests and local runs).
//! - [`WebhookVerifier`] / [`GatewayNotification`]: inbound signature check
//!   and event decoding.

pub mod mock;
pub mod stripe;
pub mod webhook;

use std::fmt;

use async_trait::async_trait;

use crate::domain::{Money, SessionMetadata};
use crate::error::GatewayError;

pub use mock::MockPaymentGateway;
pub use stripe::StripeGateway;
pub use webhook::{CompletedSession, GatewayNotification, SIGNATURE_HEADER, WebhookVerifier};

/// One priced line shown on the payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    /// Product name (the ticket type name).
    pub name: String,
    /// Price per unit.
    pub unit_price: Money,
    /// Units.
    pub quantity: u32,
}

/// Everything needed to open a payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Lines to charge.
    pub line_items: Vec<SessionLineItem>,
    /// ISO currency code, lower case.
    pub currency: String,
    /// Buyer email pre-filled on the payment page.
    pub customer_email: String,
    /// Redirect after payment.
    pub success_url: String,
    /// Redirect after the buyer abandons the page.
    pub cancel_url: String,
    /// Opaque correlation data echoed back in the completion notification.
    pub metadata: SessionMetadata,
}

/// A session the buyer can be redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Gateway session identifier.
    pub id: String,
    /// Hosted payment page.
    pub url: String,
}

/// Outbound half of the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    /// Creates a hosted payment session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PaymentGatewayError`] if the gateway is
    /// unreachable or rejects the request.
    async fn create_session(&self, request: &SessionRequest)
    -> Result<CheckoutSession, GatewayError>;
}

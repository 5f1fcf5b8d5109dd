//! Stripe Checkout client.
//!
//! Sessions are created with a form-encoded `POST /v1/checkout/sessions`
//! authenticated by the secret key. Nested parameters use Stripe's bracket
//! syntax (`line_items[0][price_data][currency]`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CheckoutSession, PaymentGateway, SessionRequest};
use crate::error::GatewayError;

/// Payment gateway backed by the Stripe HTTP API.
#[derive(Clone)]
pub struct StripeGateway {
    http_client: Client,
    api_base: String,
    secret_key: String,
}

impl fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("secret_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl StripeGateway {
    /// Creates a client for `api_base` (e.g. `https://api.stripe.com`).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

/// Flattens a session request into Stripe form parameters.
pub(crate) fn session_form(request: &SessionRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("customer_email".to_string(), request.customer_email.clone()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        params.push((
            format!("{prefix}[price_data][currency]"),
            request.currency.clone(),
        ));
        params.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        params.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_price.cents().to_string(),
        ));
        params.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in request.metadata.to_map() {
        params.push((format!("metadata[{key}]"), value));
    }
    params
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .http_client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&session_form(request))
            .send()
            .await
            .map_err(|e| GatewayError::PaymentGatewayError(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(GatewayError::PaymentGatewayError(format!(
                "session rejected ({status}): {message}"
            )));
        }

        let session = response
            .json::<SessionResponse>()
            .await
            .map_err(|e| GatewayError::PaymentGatewayError(format!("malformed response: {e}")))?;
        let Some(url) = session.url else {
            return Err(GatewayError::PaymentGatewayError(format!(
                "session {} has no url",
                session.id
            )));
        };

        tracing::debug!(session_id = %session.id, "created payment session");
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

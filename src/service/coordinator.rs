//! Checkout orchestration.
//!
//! A checkout either ends with a payment session the buyer can be sent to,
//! or fails with nothing left behind:
//!
//! 1. validate the cart (no side effects on failure);
//! 2. lock the ticket type rows and attempt the atomic multi-item hold;
//! 3. create the pending purchase and the payment session.
//!
//! Any failure in step 3 releases the hold through the [`Compensator`]
//! before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::Compensator;
use crate::domain::{
    Cart, CartItem, EventId, HoldItem, Money, PurchaseId, PurchaseLine, Reservation,
    ReservationId, ReservedLine, SessionMetadata, TicketType,
};
use crate::error::GatewayError;
use crate::hold_store::{HoldOutcome, HoldStore, expiry_after};
use crate::payment::{PaymentGateway, SessionLineItem, SessionRequest};
use crate::persistence::{Ledger, LockedTicketTypes, NewPurchase};

/// Fixed checkout parameters taken from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// How long a hold counts against availability.
    pub reservation_ttl: Duration,
    /// Upper bound on units per cart line.
    pub max_tickets_per_line: u32,
    /// Currency for session line items.
    pub currency: String,
    /// Redirect after successful payment.
    pub success_url: String,
    /// Redirect after an abandoned payment.
    pub cancel_url: String,
}

/// A buyer's request to pay for a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCommand {
    /// Contact email; a guest account is created if unknown.
    pub email: String,
    /// Requested lines.
    pub items: Vec<CartItem>,
}

/// Where to send the buyer, and what was reserved for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    /// Hosted payment page.
    pub url: String,
    /// Gateway session identifier.
    pub session_id: String,
    /// Pending purchase.
    pub purchase_id: PurchaseId,
    /// Reservation holding the tickets.
    pub reservation_id: ReservationId,
    /// When the hold stops counting against availability.
    pub expires_at: DateTime<Utc>,
}

/// A cart resolved against locked ledger rows.
struct PricedCart {
    event_id: EventId,
    hold_items: Vec<HoldItem>,
    purchase_lines: Vec<PurchaseLine>,
    session_lines: Vec<SessionLineItem>,
    total: Money,
}

impl PricedCart {
    fn resolve(cart: &Cart, rows: &[TicketType]) -> Result<Self, GatewayError> {
        let mut event_id = None;
        let mut priced = Self {
            event_id: EventId::new(0),
            hold_items: Vec::with_capacity(cart.lines().len()),
            purchase_lines: Vec::with_capacity(cart.lines().len()),
            session_lines: Vec::with_capacity(cart.lines().len()),
            total: Money::ZERO,
        };

        for line in cart.lines() {
            let Some(row) = rows.iter().find(|row| row.id == line.ticket_type_id) else {
                return Err(GatewayError::TicketTypeNotFound(line.ticket_type_id));
            };
            match event_id {
                None => event_id = Some(row.event_id),
                Some(first) if first != row.event_id => {
                    return Err(GatewayError::InvalidInput(
                        "all tickets in a cart must belong to the same event".to_string(),
                    ));
                }
                Some(_) => {}
            }

            priced.total = priced.total.plus(row.price.times(line.quantity)?)?;
            priced.hold_items.push(HoldItem {
                ticket_type_id: row.id,
                total_quantity: row.total_quantity,
                sold_quantity: row.sold_quantity,
                requested: line.quantity,
            });
            priced.purchase_lines.push(PurchaseLine {
                ticket_type_id: row.id,
                quantity: line.quantity,
                unit_price: row.price,
            });
            priced.session_lines.push(SessionLineItem {
                name: row.name.clone(),
                unit_price: row.price,
                quantity: line.quantity,
            });
        }

        let Some(event_id) = event_id else {
            return Err(GatewayError::InvalidInput("cart is empty".to_string()));
        };
        priced.event_id = event_id;
        Ok(priced)
    }

    fn reserved_lines(&self) -> Vec<ReservedLine> {
        self.hold_items
            .iter()
            .map(|item| ReservedLine {
                ticket_type_id: item.ticket_type_id,
                quantity: item.requested,
            })
            .collect()
    }
}

/// Turns carts into held reservations with a payment session.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator {
    ledger: Arc<dyn Ledger>,
    hold_store: Arc<dyn HoldStore>,
    payments: Arc<dyn PaymentGateway>,
    compensator: Compensator,
    settings: CheckoutSettings,
}

impl ReservationCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        hold_store: Arc<dyn HoldStore>,
        payments: Arc<dyn PaymentGateway>,
        compensator: Compensator,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            ledger,
            hold_store,
            payments,
            compensator,
            settings,
        }
    }

    /// Holds the cart and opens a payment session for it.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidInput`]: malformed cart or email, or a cart
    ///   spanning several events. Nothing was written.
    /// - [`GatewayError::TicketTypeNotFound`]: unknown ticket type. Nothing
    ///   was written.
    /// - [`GatewayError::InsufficientInventory`]: the atomic hold failed.
    ///   Nothing is held.
    /// - Store, ledger, or gateway errors. Any hold taken was released.
    pub async fn checkout(
        &self,
        command: CheckoutCommand,
    ) -> Result<CheckoutReceipt, GatewayError> {
        let email = command.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(GatewayError::InvalidInput(
                "a valid email address is required".to_string(),
            ));
        }
        let cart = Cart::new(&command.items, self.settings.max_tickets_per_line)?;
        let reservation_id = ReservationId::new();

        let locked = self.ledger.lock_ticket_types(&cart.ticket_type_ids()).await?;
        let priced = PricedCart::resolve(&cart, locked.ticket_types())?;

        let now = Utc::now();
        let ttl = self.settings.reservation_ttl;
        match self
            .hold_store
            .attempt_hold(&priced.hold_items, reservation_id, ttl, now)
            .await?
        {
            HoldOutcome::Held => {}
            HoldOutcome::Insufficient { ticket_type_id } => {
                tracing::info!(
                    %reservation_id,
                    %ticket_type_id,
                    "hold rejected: insufficient inventory"
                );
                return Err(GatewayError::InsufficientInventory(ticket_type_id));
            }
        }

        let expires_at = expiry_after(now, ttl);
        let mut reservation = Reservation::held(reservation_id, priced.reserved_lines(), expires_at);
        tracing::info!(
            %reservation_id,
            units = cart.total_units(),
            %expires_at,
            "inventory held"
        );

        match self.hand_off(locked, email, &priced, &reservation).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                tracing::warn!(%reservation_id, error = %e, "checkout failed after hold, releasing");
                if let Err(release_error) = self.compensator.release(&mut reservation).await {
                    tracing::error!(
                        %reservation_id,
                        error = %release_error,
                        "compensating release failed; hold will lapse at expiry"
                    );
                }
                Err(e)
            }
        }
    }

    async fn hand_off(
        &self,
        locked: Box<dyn LockedTicketTypes>,
        email: &str,
        priced: &PricedCart,
        reservation: &Reservation,
    ) -> Result<CheckoutReceipt, GatewayError> {
        locked.finish().await?;

        let user_id = self.ledger.find_or_create_guest(email).await?;
        let purchase_id = self
            .ledger
            .create_pending_purchase(NewPurchase {
                user_id,
                event_id: priced.event_id,
                total_amount: priced.total,
            })
            .await?;

        let request = SessionRequest {
            line_items: priced.session_lines.clone(),
            currency: self.settings.currency.clone(),
            customer_email: email.to_string(),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            metadata: SessionMetadata {
                purchase_id,
                event_id: priced.event_id,
                user_id,
                reservation_id: reservation.id(),
                lines: priced.purchase_lines.clone(),
            },
        };
        let session = self.payments.create_session(&request).await?;

        tracing::info!(
            reservation_id = %reservation.id(),
            %purchase_id,
            session_id = %session.id,
            total = %priced.total,
            "checkout handed off to payment gateway"
        );
        Ok(CheckoutReceipt {
            url: session.url,
            session_id: session.id,
            purchase_id,
            reservation_id: reservation.id(),
            expires_at: reservation.expires_at().unwrap_or_else(Utc::now),
        })
    }
}

//! Checkout carts.

use serde::Deserialize;
use utoipa::ToSchema;

use super::TicketTypeId;
use crate::error::GatewayError;

/// One requested line of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
pub struct CartItem {
    /// Requested ticket type.
    pub ticket_type_id: TicketTypeId,
    /// Requested units.
    pub quantity: u32,
}

/// A validated, non-empty cart with one line per ticket type.
///
/// Duplicate lines for the same ticket type are merged so the hold
/// procedure sees each ticket type exactly once. Line order follows the
/// first occurrence of each ticket type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartItem>,
}

impl Cart {
    /// Validates raw cart lines.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidInput`] if the cart is empty, a line
    /// asks for zero units, or a merged line exceeds `max_per_line`.
    pub fn new(items: &[CartItem], max_per_line: u32) -> Result<Self, GatewayError> {
        if items.is_empty() {
            return Err(GatewayError::InvalidInput("cart is empty".to_string()));
        }

        let mut lines: Vec<CartItem> = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(GatewayError::InvalidInput(format!(
                    "quantity for ticket type {} must be positive",
                    item.ticket_type_id
                )));
            }
            match lines
                .iter_mut()
                .find(|line| line.ticket_type_id == item.ticket_type_id)
            {
                Some(line) => {
                    line.quantity = line.quantity.saturating_add(item.quantity);
                }
                None => lines.push(*item),
            }
        }

        if let Some(line) = lines.iter().find(|line| line.quantity > max_per_line) {
            return Err(GatewayError::InvalidInput(format!(
                "at most {max_per_line} tickets of type {} per order",
                line.ticket_type_id
            )));
        }

        Ok(Self { lines })
    }

    /// Returns the merged lines.
    #[must_use]
    pub fn lines(&self) -> &[CartItem] {
        &self.lines
    }

    /// Returns the distinct ticket type ids in line order.
    #[must_use]
    pub fn ticket_type_ids(&self) -> Vec<TicketTypeId> {
        self.lines.iter().map(|line| line.ticket_type_id).collect()
    }

    /// Total units across all lines.
    #[must_use]
    pub fn total_units(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |acc, line| acc.saturating_add(line.quantity))
    }
}

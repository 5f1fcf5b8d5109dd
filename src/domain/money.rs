//! Monetary amounts in minor currency units.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;

/// An amount of money in minor units (cents).
///
/// Prices live in the ledger as `BIGINT` cents and travel through the
/// payment gateway as integers, so no floating-point rounding ever touches
/// a total.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    ToSchema,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Multiplies a unit price by a quantity.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidInput`] on overflow.
    pub fn times(self, quantity: u32) -> Result<Self, GatewayError> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Self)
            .ok_or_else(|| GatewayError::InvalidInput("order total overflows".to_string()))
    }

    /// Adds two amounts.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidInput`] on overflow.
    pub fn plus(self, other: Self) -> Result<Self, GatewayError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| GatewayError::InvalidInput("order total overflows".to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

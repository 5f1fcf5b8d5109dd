//! Type-safe identifiers.
//!
//! Ledger rows are keyed by PostgreSQL `BIGSERIAL` values, wrapped in
//! newtypes so a ticket type id cannot be passed where a purchase id is
//! expected. [`ReservationId`] is a UUID v4 generated per checkout attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw database key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

ledger_id!(
    /// Primary key of a `ticket_types` row.
    TicketTypeId
);
ledger_id!(
    /// Primary key of an `events` row.
    EventId
);
ledger_id!(
    /// Primary key of a `users` row.
    UserId
);
ledger_id!(
    /// Primary key of a `purchases` row.
    PurchaseId
);

/// Unique identifier for one checkout attempt's bundle of holds.
///
/// Wraps a UUID v4. A collision would let two checkouts share (and release)
/// each other's holds, so the id is always drawn from the OS RNG through
/// [`uuid::Uuid::new_v4`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ReservationId(uuid::Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `ReservationId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReservationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn reservation_ids_are_unique() {
        let a = ReservationId::new();
        let b = ReservationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn reservation_id_parses_its_display_form() {
        let id = ReservationId::new();
        let Ok(parsed) = id.to_string().parse::<ReservationId>() else {
            panic!("display form should parse");
        };
        assert_eq!(parsed, id);
    }

    #[test]
    fn ledger_ids_parse_and_display() {
        let Ok(id) = "42".parse::<TicketTypeId>() else {
            panic!("valid id");
        };
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert!("forty-two".parse::<PurchaseId>().is_err());
    }

    #[test]
    fn ledger_ids_serialize_transparently() {
        let json = serde_json::to_string(&UserId::new(9)).ok();
        assert_eq!(json.as_deref(), Some("9"));
    }
}

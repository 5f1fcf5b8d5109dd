//! Reservation identity carried through the payment gateway.
//!
//! The gateway stores session metadata as a flat string map and echoes it
//! back unchanged in the completion notification. Line items are packed as
//! `"<ticket_type_id>:<quantity>:<unit_price_cents>"` joined with `;`.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::{EventId, Money, PurchaseId, PurchaseLine, ReservationId, TicketTypeId, UserId};
use crate::error::GatewayError;

const PURCHASE_ID: &str = "purchase_id";
const EVENT_ID: &str = "event_id";
const USER_ID: &str = "user_id";
const RESERVATION_ID: &str = "reservation_id";
const ITEMS: &str = "items";

/// Opaque metadata attached to a payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Pending purchase row.
    pub purchase_id: PurchaseId,
    /// Event of the cart.
    pub event_id: EventId,
    /// Buyer.
    pub user_id: UserId,
    /// Hold-store reservation to release after fulfillment.
    pub reservation_id: ReservationId,
    /// Priced lines.
    pub lines: Vec<PurchaseLine>,
}

impl SessionMetadata {
    /// Encodes the metadata as the gateway's string map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let items = self
            .lines
            .iter()
            .map(|line| {
                format!(
                    "{}:{}:{}",
                    line.ticket_type_id,
                    line.quantity,
                    line.unit_price.cents()
                )
            })
            .collect::<Vec<_>>()
            .join(";");

        BTreeMap::from([
            (PURCHASE_ID.to_string(), self.purchase_id.to_string()),
            (EVENT_ID.to_string(), self.event_id.to_string()),
            (USER_ID.to_string(), self.user_id.to_string()),
            (RESERVATION_ID.to_string(), self.reservation_id.to_string()),
            (ITEMS.to_string(), items),
        ])
    }

    /// Decodes metadata echoed back by the gateway.
    ///
    /// Decoding is all-or-nothing: a single malformed field rejects the
    /// whole notification before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if a key is missing or malformed.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, GatewayError> {
        let lines = required(map, ITEMS)?
            .split(';')
            .map(parse_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            purchase_id: parse_field(map, PURCHASE_ID)?,
            event_id: parse_field(map, EVENT_ID)?,
            user_id: parse_field(map, USER_ID)?,
            reservation_id: parse_field(map, RESERVATION_ID)?,
            lines,
        })
    }
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, GatewayError> {
    map.get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::Internal(format!("session metadata is missing {key}")))
}

fn parse_field<T: FromStr>(map: &BTreeMap<String, String>, key: &str) -> Result<T, GatewayError> {
    let raw = required(map, key)?;
    raw.parse()
        .map_err(|_| GatewayError::Internal(format!("session metadata {key} is malformed: {raw:?}")))
}

fn parse_line(raw: &str) -> Result<PurchaseLine, GatewayError> {
    let malformed = || GatewayError::Internal(format!("malformed metadata line item {raw:?}"));

    let mut parts = raw.split(':');
    let (Some(id), Some(quantity), Some(price), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let ticket_type_id: TicketTypeId = id.parse().map_err(|_| malformed())?;
    let quantity: u32 = quantity.parse().map_err(|_| malformed())?;
    let cents: i64 = price.parse().map_err(|_| malformed())?;
    if quantity == 0 || cents < 0 {
        return Err(malformed());
    }

    Ok(PurchaseLine {
        ticket_type_id,
        quantity,
        unit_price: Money::from_cents(cents),
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            purchase_id: PurchaseId::new(12),
            event_id: EventId::new(3),
            user_id: UserId::new(44),
            reservation_id: ReservationId::new(),
            lines: vec![
                PurchaseLine {
                    ticket_type_id: TicketTypeId::new(5),
                    quantity: 2,
                    unit_price: Money::from_cents(2500),
                },
                PurchaseLine {
                    ticket_type_id: TicketTypeId::new(6),
                    quantity: 1,
                    unit_price: Money::from_cents(9900),
                },
            ],
        }
    }

    #[test]
    fn items_use_compact_line_encoding() {
        let map = metadata().to_map();
        assert_eq!(map.get("items").map(String::as_str), Some("5:2:2500;6:1:9900"));
        assert_eq!(map.get("purchase_id").map(String::as_str), Some("12"));
    }

    #[test]
    fn decodes_what_checkout_wrote() {
        let original = metadata();
        let Ok(decoded) = SessionMetadata::from_map(&original.to_map()) else {
            panic!("metadata written by checkout should decode");
        };
        assert_eq!(decoded, original);
    }

    #[test]
    fn missing_reservation_is_rejected() {
        let mut map = metadata().to_map();
        map.remove("reservation_id");
        assert!(matches!(
            SessionMetadata::from_map(&map),
            Err(GatewayError::Internal(_))
        ));
    }

    #[test]
    fn one_bad_line_rejects_everything() {
        let mut map = metadata().to_map();
        map.insert("items".to_string(), "5:2:2500;6:x:9900".to_string());
        assert!(SessionMetadata::from_map(&map).is_err());

        map.insert("items".to_string(), "5:2".to_string());
        assert!(SessionMetadata::from_map(&map).is_err());

        map.insert("items".to_string(), "5:0:2500".to_string());
        assert!(SessionMetadata::from_map(&map).is_err());
    }
}

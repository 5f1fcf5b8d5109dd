//! Ticket code generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::domain::{PurchaseId, TicketTypeId};

/// Produces unique scan codes for issued tickets.
pub trait TicketCodeGenerator: Send + Sync + fmt::Debug {
    /// Returns a fresh code for one ticket of `ticket_type_id` in
    /// `purchase_id`. Codes must never repeat.
    fn next_code(&self, purchase_id: PurchaseId, ticket_type_id: TicketTypeId) -> String;
}

/// `<prefix>-<purchase>-<ticket type>-<random uuid>` codes.
#[derive(Debug, Clone)]
pub struct UuidCodeGenerator {
    prefix: String,
}

impl UuidCodeGenerator {
    /// Creates a generator with the given code prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TicketCodeGenerator for UuidCodeGenerator {
    fn next_code(&self, purchase_id: PurchaseId, ticket_type_id: TicketTypeId) -> String {
        format!(
            "{}-{purchase_id}-{ticket_type_id}-{}",
            self.prefix,
            Uuid::new_v4().simple()
        )
    }
}

/// Numbered codes (`<prefix>-<n>`), deterministic across runs.
#[derive(Debug, Default)]
pub struct SequentialCodeGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialCodeGenerator {
    /// Creates a generator starting at 1.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl TicketCodeGenerator for SequentialCodeGenerator {
    fn next_code(&self, _purchase_id: PurchaseId, _ticket_type_id: TicketTypeId) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn uuid_codes_embed_ids_and_do_not_repeat() {
        let generator = UuidCodeGenerator::new("TKT");
        let codes: HashSet<String> = (0..100)
            .map(|_| generator.next_code(PurchaseId::new(7), TicketTypeId::new(5)))
            .collect();
        assert_eq!(codes.len(), 100);
        assert!(codes.iter().all(|c| c.starts_with("TKT-7-5-")));
    }

    #[test]
    fn sequential_codes_count_up() {
        let generator = SequentialCodeGenerator::new("T");
        let a = generator.next_code(PurchaseId::new(1), TicketTypeId::new(1));
        let b = generator.next_code(PurchaseId::new(1), TicketTypeId::new(1));
        assert_eq!((a.as_str(), b.as_str()), ("T-1", "T-2"));
    }
}

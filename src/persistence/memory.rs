//! In-process ledger used by the test suite.
//!
//! All tables sit behind one `tokio::sync::Mutex`. A ticket type lock is an
//! owned guard on that mutex, so while a checkout holds it no other ledger
//! call can proceed. Fulfillment works on a cloned copy of the tables and
//! swaps it in only when every step succeeded, which gives the same
//! all-or-nothing visibility as a database transaction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::models::{FulfilledPurchase, FulfilmentOutcome, FulfilmentRequest, NewPurchase};
use super::{Ledger, LockedTicketTypes};
use crate::domain::{
    EventId, IssuedTicket, Money, PaymentStatus, PendingPurchase, PurchaseDetails, PurchaseId,
    Ticket, TicketStatus, TicketType, TicketTypeId, UserId,
};
use crate::error::GatewayError;

#[derive(Debug, Clone, Default)]
struct LedgerTables {
    next_id: i64,
    events: BTreeMap<EventId, String>,
    users: BTreeMap<UserId, String>,
    ticket_types: BTreeMap<TicketTypeId, TicketType>,
    purchases: BTreeMap<PurchaseId, PendingPurchase>,
    tickets: Vec<Ticket>,
}

impl LedgerTables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_email(&self, id: UserId) -> Result<String, GatewayError> {
        self.users
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::PersistenceError(format!("user {id} not found")))
    }

    fn mark_failed(&mut self, purchase_id: PurchaseId, session_id: &str) {
        if let Some(purchase) = self.purchases.get_mut(&purchase_id) {
            if purchase.payment_status == PaymentStatus::Pending {
                purchase.payment_status = PaymentStatus::Failed;
                purchase.payment_session_id = Some(session_id.to_string());
                purchase.updated_at = Utc::now();
            }
        }
    }

    /// Applies a fulfillment to `self`. On `Err` or a non-`Fulfilled`
    /// outcome the caller discards the copy.
    fn apply_fulfilment(
        &mut self,
        request: &FulfilmentRequest,
    ) -> Result<FulfilmentOutcome, GatewayError> {
        let Some(purchase) = self.purchases.get_mut(&request.purchase_id) else {
            return Err(GatewayError::Internal(format!(
                "purchase {} not found",
                request.purchase_id
            )));
        };
        match purchase.payment_status {
            PaymentStatus::Succeeded => return Ok(FulfilmentOutcome::AlreadyFulfilled),
            PaymentStatus::Failed => return Ok(FulfilmentOutcome::AlreadyRejected),
            PaymentStatus::Pending => {}
        }
        if purchase.user_id != request.user_id {
            return Err(GatewayError::Internal(format!(
                "purchase {} belongs to user {}, metadata says {}",
                request.purchase_id, purchase.user_id, request.user_id
            )));
        }
        purchase.payment_status = PaymentStatus::Succeeded;
        purchase.payment_session_id = Some(request.session_id.clone());
        purchase.updated_at = Utc::now();
        let event_id = purchase.event_id;

        let mut issued = Vec::with_capacity(request.tickets.len());
        for line in &request.lines {
            let Some(ticket_type) = self.ticket_types.get_mut(&line.ticket_type_id) else {
                return Err(GatewayError::PersistenceError(format!(
                    "ticket type {} not found",
                    line.ticket_type_id
                )));
            };
            let sold = ticket_type.sold_quantity.saturating_add(line.quantity);
            if sold > ticket_type.total_quantity {
                return Ok(FulfilmentOutcome::CapacityExhausted {
                    ticket_type_id: line.ticket_type_id,
                });
            }
            ticket_type.sold_quantity = sold;
            let name = ticket_type.name.clone();

            for ticket in request
                .tickets
                .iter()
                .filter(|t| t.ticket_type_id == line.ticket_type_id)
            {
                if self.tickets.iter().any(|t| t.code == ticket.code) {
                    return Err(GatewayError::PersistenceError(format!(
                        "duplicate ticket code {}",
                        ticket.code
                    )));
                }
                let id = self.next_id();
                self.tickets.push(Ticket {
                    id,
                    ticket_type_id: ticket.ticket_type_id,
                    user_id: request.user_id,
                    purchase_id: request.purchase_id,
                    code: ticket.code.clone(),
                    status: TicketStatus::Valid,
                });
                issued.push(IssuedTicket {
                    ticket_type_id: ticket.ticket_type_id,
                    ticket_type_name: name.clone(),
                    code: ticket.code.clone(),
                    status: TicketStatus::Valid,
                });
            }
        }

        Ok(FulfilmentOutcome::Fulfilled(FulfilledPurchase {
            purchase_id: request.purchase_id,
            event_id,
            purchaser_email: self.user_email(request.user_id)?,
            tickets: issued,
        }))
    }
}

/// Mutex-guarded ledger tables.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: Arc<Mutex<LedgerTables>>,
    fail_fulfilment: AtomicBool,
    offline: AtomicBool,
}

struct MemoryLockedTicketTypes {
    _guard: OwnedMutexGuard<LedgerTables>,
    rows: Vec<TicketType>,
}

impl fmt::Debug for MemoryLockedTicketTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLockedTicketTypes")
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LockedTicketTypes for MemoryLockedTicketTypes {
    fn ticket_types(&self) -> &[TicketType] {
        &self.rows
    }

    async fn finish(self: Box<Self>) -> Result<(), GatewayError> {
        Ok(())
    }
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event and returns its id.
    pub async fn insert_event(&self, title: &str) -> EventId {
        let mut tables = self.tables.lock().await;
        let id = EventId::new(tables.next_id());
        tables.events.insert(id, title.to_string());
        id
    }

    /// Adds a ticket type with the given capacity and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidInput`] if the event does not exist or
    /// `sold_quantity` exceeds `total_quantity`.
    pub async fn insert_ticket_type(
        &self,
        event_id: EventId,
        name: &str,
        price: Money,
        total_quantity: u32,
        sold_quantity: u32,
    ) -> Result<TicketTypeId, GatewayError> {
        let mut tables = self.tables.lock().await;
        if !tables.events.contains_key(&event_id) {
            return Err(GatewayError::InvalidInput(format!(
                "event {event_id} does not exist"
            )));
        }
        if sold_quantity > total_quantity {
            return Err(GatewayError::InvalidInput(
                "sold_quantity exceeds total_quantity".to_string(),
            ));
        }
        let id = TicketTypeId::new(tables.next_id());
        tables.ticket_types.insert(
            id,
            TicketType {
                id,
                event_id,
                name: name.to_string(),
                price,
                total_quantity,
                sold_quantity,
            },
        );
        Ok(id)
    }

    /// Overwrites a ticket type's sold counter, bypassing fulfillment.
    pub async fn set_sold_quantity(&self, id: TicketTypeId, sold_quantity: u32) {
        if let Some(ticket_type) = self.tables.lock().await.ticket_types.get_mut(&id) {
            ticket_type.sold_quantity = sold_quantity;
        }
    }

    /// Makes every subsequent [`Ledger::fulfil_purchase`] fail with a
    /// retryable error until switched off.
    pub fn fail_fulfilments(&self, fail: bool) {
        self.fail_fulfilment.store(fail, Ordering::SeqCst);
    }

    /// Makes [`Ledger::ping`] report the ledger as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Tickets issued for a purchase, in insertion order.
    pub async fn tickets_for(&self, purchase_id: PurchaseId) -> Vec<Ticket> {
        self.tables
            .lock()
            .await
            .tickets
            .iter()
            .filter(|t| t.purchase_id == purchase_id)
            .cloned()
            .collect()
    }

    /// Total number of purchases recorded.
    pub async fn purchase_count(&self) -> usize {
        self.tables.lock().await.purchases.len()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn lock_ticket_types(
        &self,
        ids: &[TicketTypeId],
    ) -> Result<Box<dyn LockedTicketTypes>, GatewayError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let mut rows: Vec<TicketType> = ids
            .iter()
            .filter_map(|id| guard.ticket_types.get(id).cloned())
            .collect();
        rows.sort_by_key(|t| t.id);
        rows.dedup_by_key(|t| t.id);
        Ok(Box::new(MemoryLockedTicketTypes {
            _guard: guard,
            rows,
        }))
    }

    async fn find_or_create_guest(&self, email: &str) -> Result<UserId, GatewayError> {
        let mut tables = self.tables.lock().await;
        if let Some((id, _)) = tables.users.iter().find(|(_, e)| e.as_str() == email) {
            return Ok(*id);
        }
        let id = UserId::new(tables.next_id());
        tables.users.insert(id, email.to_string());
        tracing::debug!(user_id = %id, "created guest user");
        Ok(id)
    }

    async fn create_pending_purchase(
        &self,
        purchase: NewPurchase,
    ) -> Result<PurchaseId, GatewayError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&purchase.user_id) {
            return Err(GatewayError::PersistenceError(format!(
                "user {} not found",
                purchase.user_id
            )));
        }
        let id = PurchaseId::new(tables.next_id());
        let now = Utc::now();
        tables.purchases.insert(
            id,
            PendingPurchase {
                id,
                user_id: purchase.user_id,
                event_id: purchase.event_id,
                total_amount: purchase.total_amount,
                payment_status: PaymentStatus::Pending,
                payment_session_id: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn fulfil_purchase(
        &self,
        request: FulfilmentRequest,
    ) -> Result<FulfilmentOutcome, GatewayError> {
        if self.fail_fulfilment.load(Ordering::SeqCst) {
            return Err(GatewayError::PersistenceError(
                "ledger unavailable".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let mut working = tables.clone();
        let outcome = working.apply_fulfilment(&request)?;
        match outcome {
            FulfilmentOutcome::Fulfilled(_) => *tables = working,
            FulfilmentOutcome::CapacityExhausted { .. } => {
                tables.mark_failed(request.purchase_id, &request.session_id);
            }
            FulfilmentOutcome::AlreadyFulfilled | FulfilmentOutcome::AlreadyRejected => {}
        }
        Ok(outcome)
    }

    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, GatewayError> {
        Ok(self.tables.lock().await.ticket_types.get(&id).cloned())
    }

    async fn purchase(&self, id: PurchaseId) -> Result<Option<PendingPurchase>, GatewayError> {
        Ok(self.tables.lock().await.purchases.get(&id).cloned())
    }

    async fn purchase_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PurchaseDetails>, GatewayError> {
        let tables = self.tables.lock().await;
        let Some(purchase) = tables
            .purchases
            .values()
            .find(|p| p.payment_session_id.as_deref() == Some(session_id))
            .cloned()
        else {
            return Ok(None);
        };

        let mut names: HashMap<TicketTypeId, &str> = HashMap::new();
        for ticket_type in tables.ticket_types.values() {
            names.insert(ticket_type.id, ticket_type.name.as_str());
        }
        let tickets = tables
            .tickets
            .iter()
            .filter(|t| t.purchase_id == purchase.id)
            .map(|t| IssuedTicket {
                ticket_type_id: t.ticket_type_id,
                ticket_type_name: names
                    .get(&t.ticket_type_id)
                    .map(|n| (*n).to_string())
                    .unwrap_or_default(),
                code: t.code.clone(),
                status: t.status,
            })
            .collect();

        Ok(Some(PurchaseDetails {
            purchaser_email: tables.user_email(purchase.user_id)?,
            purchase,
            tickets,
        }))
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::PersistenceError(
                "ledger unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

//! PostgreSQL implementation of the ledger.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::{
    FulfilledPurchase, FulfilmentOutcome, FulfilmentRequest, NewPurchase, PurchaseRow,
    TicketTypeRow, purchase_from_row, ticket_type_from_row,
};
use super::{Ledger, LockedTicketTypes};
use crate::config::GatewayConfig;
use crate::domain::{
    EventId, IssuedTicket, PaymentStatus, PendingPurchase, PurchaseDetails, PurchaseId,
    PurchaseLine, TicketStatus, TicketType, TicketTypeId, UserId,
};
use crate::error::GatewayError;

const TICKET_TYPE_COLUMNS: &str =
    "id, event_id, name, price_cents, total_quantity, sold_quantity";

const PURCHASE_COLUMNS: &str = "p.id, p.user_id, p.event_id, p.total_cents, p.payment_status, \
     p.payment_session_id, p.created_at, p.updated_at";

/// PostgreSQL-backed ledger using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

/// Ticket type rows locked `FOR UPDATE` inside an open transaction.
struct PgLockedTicketTypes {
    tx: Transaction<'static, Postgres>,
    rows: Vec<TicketType>,
}

impl fmt::Debug for PgLockedTicketTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgLockedTicketTypes")
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LockedTicketTypes for PgLockedTicketTypes {
    fn ticket_types(&self) -> &[TicketType] {
        &self.rows
    }

    async fn finish(self: Box<Self>) -> Result<(), GatewayError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Purchase lines sorted by ticket type id, the ledger's row lock order.
fn settlement_order(lines: &[PurchaseLine]) -> Vec<PurchaseLine> {
    let mut sorted = lines.to_vec();
    sorted.sort_by_key(|line| line.ticket_type_id);
    sorted
}

fn to_i32(value: u32, what: &str) -> Result<i32, GatewayError> {
    i32::try_from(value).map_err(|_| GatewayError::InvalidInput(format!("{what} out of range")))
}

impl PostgresLedger {
    /// Creates a ledger over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the database is
    /// unreachable.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to PostgreSQL ledger"
        );
        Ok(Self { pool })
    }

    /// Applies pending schema migrations from `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        purchase_id: PurchaseId,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE purchases SET payment_status = $1, payment_session_id = $2, updated_at = now() \
             WHERE id = $3 AND payment_status = $4",
        )
        .bind(PaymentStatus::Failed.as_str())
        .bind(session_id)
        .bind(purchase_id.get())
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn lock_ticket_types(
        &self,
        ids: &[TicketTypeId],
    ) -> Result<Box<dyn LockedTicketTypes>, GatewayError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let mut tx = self.pool.begin().await?;

        // Ascending id order keeps concurrent checkouts from deadlocking.
        let rows = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&raw_ids)
        .fetch_all(&mut *tx)
        .await?;

        let rows = rows
            .into_iter()
            .map(ticket_type_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(PgLockedTicketTypes { tx, rows }))
    }

    async fn find_or_create_guest(&self, email: &str) -> Result<UserId, GatewayError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (email, role) VALUES ($1, 'guest') \
             ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email RETURNING id",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId::new(id))
    }

    async fn create_pending_purchase(
        &self,
        purchase: NewPurchase,
    ) -> Result<PurchaseId, GatewayError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO purchases (user_id, event_id, total_cents, payment_status) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(purchase.user_id.get())
        .bind(purchase.event_id.get())
        .bind(purchase.total_amount.cents())
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(PurchaseId::new(id))
    }

    async fn fulfil_purchase(
        &self,
        request: FulfilmentRequest,
    ) -> Result<FulfilmentOutcome, GatewayError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes duplicate deliveries of the same notification.
        let current = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT payment_status, user_id, event_id FROM purchases WHERE id = $1 FOR UPDATE",
        )
        .bind(request.purchase_id.get())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, user_id, event_id)) = current else {
            return Err(GatewayError::Internal(format!(
                "purchase {} not found",
                request.purchase_id
            )));
        };
        match status.parse::<PaymentStatus>()? {
            PaymentStatus::Succeeded => return Ok(FulfilmentOutcome::AlreadyFulfilled),
            PaymentStatus::Failed => return Ok(FulfilmentOutcome::AlreadyRejected),
            PaymentStatus::Pending => {}
        }
        if user_id != request.user_id.get() {
            return Err(GatewayError::Internal(format!(
                "purchase {} belongs to user {user_id}, metadata says {}",
                request.purchase_id, request.user_id
            )));
        }

        sqlx::query(
            "UPDATE purchases SET payment_status = $1, payment_session_id = $2, updated_at = now() \
             WHERE id = $3",
        )
        .bind(PaymentStatus::Succeeded.as_str())
        .bind(&request.session_id)
        .bind(request.purchase_id.get())
        .execute(&mut *tx)
        .await?;

        // Same ascending order as `lock_ticket_types`, whatever the cart order.
        let lines = settlement_order(&request.lines);
        let raw_ids: Vec<i64> = lines.iter().map(|line| line.ticket_type_id.get()).collect();
        sqlx::query("SELECT id FROM ticket_types WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&raw_ids)
            .execute(&mut *tx)
            .await?;

        let mut tickets = Vec::with_capacity(request.tickets.len());
        for line in &lines {
            let name = sqlx::query_scalar::<_, String>(
                "UPDATE ticket_types SET sold_quantity = sold_quantity + $2 \
                 WHERE id = $1 AND sold_quantity + $2 <= total_quantity RETURNING name",
            )
            .bind(line.ticket_type_id.get())
            .bind(to_i32(line.quantity, "quantity")?)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(name) = name else {
                tx.rollback().await?;
                self.mark_failed(request.purchase_id, &request.session_id)
                    .await?;
                return Ok(FulfilmentOutcome::CapacityExhausted {
                    ticket_type_id: line.ticket_type_id,
                });
            };

            for ticket in request
                .tickets
                .iter()
                .filter(|t| t.ticket_type_id == line.ticket_type_id)
            {
                sqlx::query(
                    "INSERT INTO tickets (ticket_type_id, user_id, purchase_id, code, status) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(ticket.ticket_type_id.get())
                .bind(request.user_id.get())
                .bind(request.purchase_id.get())
                .bind(&ticket.code)
                .bind(TicketStatus::Valid.as_str())
                .execute(&mut *tx)
                .await?;

                tickets.push(IssuedTicket {
                    ticket_type_id: ticket.ticket_type_id,
                    ticket_type_name: name.clone(),
                    code: ticket.code.clone(),
                    status: TicketStatus::Valid,
                });
            }
        }

        let purchaser_email =
            sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = $1")
                .bind(request.user_id.get())
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(FulfilmentOutcome::Fulfilled(FulfilledPurchase {
            purchase_id: request.purchase_id,
            event_id: EventId::new(event_id),
            purchaser_email,
            tickets,
        }))
    }

    async fn ticket_type(&self, id: TicketTypeId) -> Result<Option<TicketType>, GatewayError> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ticket_type_from_row).transpose()
    }

    async fn purchase(&self, id: PurchaseId) -> Result<Option<PendingPurchase>, GatewayError> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases p WHERE p.id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(purchase_from_row).transpose()
    }

    async fn purchase_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PurchaseDetails>, GatewayError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT p.id, u.email FROM purchases p JOIN users u ON u.id = p.user_id \
             WHERE p.payment_session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((purchase_id, purchaser_email)) = row else {
            return Ok(None);
        };

        let Some(purchase) = self.purchase(PurchaseId::new(purchase_id)).await? else {
            return Ok(None);
        };

        let tickets = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT t.ticket_type_id, tt.name, t.code, t.status FROM tickets t \
             JOIN ticket_types tt ON tt.id = t.ticket_type_id \
             WHERE t.purchase_id = $1 ORDER BY t.id",
        )
        .bind(purchase_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(ticket_type_id, ticket_type_name, code, status)| {
            Ok(IssuedTicket {
                ticket_type_id: TicketTypeId::new(ticket_type_id),
                ticket_type_name,
                code,
                status: status.parse()?,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

        Ok(Some(PurchaseDetails {
            purchase,
            purchaser_email,
            tickets,
        }))
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

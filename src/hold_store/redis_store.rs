//! Redis-backed hold store.
//!
//! # Layout
//!
//! - `ticket_holds:{ticket_type_id}` (hash) → field `held_quantity`
//! - `reservation:{reservation_id}` (hash) → `ticket_type_id` → units held
//! - `reservations:expiry` (sorted set) → `reservation_id` scored by expiry
//!   in unix milliseconds
//!
//! Each operation is a Lua script, so Redis executes the whole decision
//! without interleaving another client's commands. The sorted set carries
//! the logical expiry: when a reservation's score is due, its held units are
//! returned to the counters before its record is deleted. The record itself
//! also gets a `PEXPIRE` of TTL plus a grace period as a backstop; the grace
//! must exceed the sweep interval or counters could leak.
//!
//! Scripts touch keys derived from the reservation records, so the store
//! assumes a single Redis node (or a cluster with all keys in one slot).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::{HoldOutcome, HoldStore, expiry_after};
use crate::domain::{HoldItem, ReservationId, ReservedLine, TicketTypeId};
use crate::error::GatewayError;

const HOLD_KEY_PREFIX: &str = "ticket_holds:";
const RESERVATION_KEY_PREFIX: &str = "reservation:";
const EXPIRY_INDEX_KEY: &str = "reservations:expiry";
const HELD_FIELD: &str = "held_quantity";

/// Expired reservations reclaimed inside one hold script run. A hold that
/// comes back short drains the rest of the backlog in batches of this size
/// and is retried once, so a lapsed hold never blocks a checkout however far
/// the sweeper has fallen behind.
const INLINE_RECLAIM_LIMIT: usize = 100;

/// Returns expired reservations' units to their counters.
/// Expects `expiryKey`, `now`, and `reclaimLimit` locals.
const RECLAIM_LUA: &str = r"
local function giveBack(holdKey, qty)
    local left = redis.call('HINCRBY', holdKey, 'held_quantity', -qty)
    if left <= 0 then
        redis.call('HDEL', holdKey, 'held_quantity')
    end
end

local reclaimed = 0
local expired = redis.call('ZRANGEBYSCORE', expiryKey, '-inf', now, 'LIMIT', 0, reclaimLimit)
for _, id in ipairs(expired) do
    local recordKey = 'reservation:' .. id
    local lines = redis.call('HGETALL', recordKey)
    for i = 1, #lines, 2 do
        giveBack('ticket_holds:' .. lines[i], tonumber(lines[i + 1]))
    end
    redis.call('DEL', recordKey)
    redis.call('ZREM', expiryKey, id)
    reclaimed = reclaimed + 1
end
";

/// KEYS: hold keys 1..N, reservation record, expiry index.
/// ARGV: (ticket_type_id, total, sold, requested) × N, reservation id,
/// expires-at ms, record ttl ms, now ms, reclaim limit.
const HOLD_LUA: &str = r"
if #KEYS < 3 then
    return redis.error_reply('hold attempt needs at least one line')
end
local n = #KEYS - 2
local reservationKey = KEYS[n + 1]
local expiryKey = KEYS[n + 2]
local base = n * 4
local reservationId = ARGV[base + 1]
local expiresAt = tonumber(ARGV[base + 2])
local recordTtl = tonumber(ARGV[base + 3])
local now = tonumber(ARGV[base + 4])
local reclaimLimit = tonumber(ARGV[base + 5])
";

const HOLD_LUA_BODY: &str = r"
if redis.call('EXISTS', reservationKey) == 1 then
    return redis.error_reply('reservation already exists')
end

local applied = {}
for i = 1, n do
    local holdKey = KEYS[i]
    local off = (i - 1) * 4
    local ticketTypeId = ARGV[off + 1]
    local total = tonumber(ARGV[off + 2])
    local sold = tonumber(ARGV[off + 3])
    local requested = tonumber(ARGV[off + 4])
    local held = math.max(0, tonumber(redis.call('HGET', holdKey, 'held_quantity') or '0'))

    if total - sold - held < requested then
        for j = 1, #applied, 2 do
            giveBack(applied[j], applied[j + 1])
        end
        redis.call('DEL', reservationKey)
        return {0, ticketTypeId}
    end

    redis.call('HINCRBY', holdKey, 'held_quantity', requested)
    table.insert(applied, holdKey)
    table.insert(applied, requested)
    redis.call('HINCRBY', reservationKey, ticketTypeId, requested)
end

redis.call('PEXPIRE', reservationKey, recordTtl)
redis.call('ZADD', expiryKey, expiresAt, reservationId)
return {1, ''}
";

/// KEYS: reservation record, expiry index. ARGV: reservation id.
const RELEASE_LUA: &str = r"
local lines = redis.call('HGETALL', KEYS[1])
for i = 1, #lines, 2 do
    local holdKey = 'ticket_holds:' .. lines[i]
    local left = redis.call('HINCRBY', holdKey, 'held_quantity', -tonumber(lines[i + 1]))
    if left <= 0 then
        redis.call('HDEL', holdKey, 'held_quantity')
    end
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return lines
";

/// KEYS: expiry index. ARGV: now ms, limit.
const RECLAIM_PREAMBLE_LUA: &str = r"
local expiryKey = KEYS[1]
local now = tonumber(ARGV[1])
local reclaimLimit = tonumber(ARGV[2])
";

/// Redis hold store executing every mutation as a Lua script.
pub struct RedisHoldStore {
    conn_manager: ConnectionManager,
    hold_script: Script,
    release_script: Script,
    reclaim_script: Script,
    record_grace: Duration,
}

impl fmt::Debug for RedisHoldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHoldStore")
            .field("record_grace", &self.record_grace)
            .finish_non_exhaustive()
    }
}

impl RedisHoldStore {
    /// Connects to Redis and prepares the hold scripts.
    ///
    /// `record_grace` is added to the TTL for the reservation record's own
    /// key expiry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HoldStoreError`] if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(redis_url: &str, record_grace: Duration) -> Result<Self, GatewayError> {
        let client = Client::open(redis_url).map_err(|e| {
            GatewayError::HoldStoreError(format!("failed to create Redis client: {e}"))
        })?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            GatewayError::HoldStoreError(format!("failed to connect to Redis: {e}"))
        })?;

        tracing::info!("connected to Redis hold store");
        Ok(Self {
            conn_manager,
            hold_script: Script::new(&format!("{HOLD_LUA}{RECLAIM_LUA}{HOLD_LUA_BODY}")),
            release_script: Script::new(RELEASE_LUA),
            reclaim_script: Script::new(&format!(
                "{RECLAIM_PREAMBLE_LUA}{RECLAIM_LUA}return reclaimed"
            )),
            record_grace,
        })
    }

    async fn run_hold_script(
        &self,
        items: &[HoldItem],
        reservation_id: ReservationId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<HoldOutcome, GatewayError> {
        let mut invocation = self.hold_script.prepare_invoke();
        for item in items {
            invocation.key(Self::hold_key(item.ticket_type_id));
        }
        invocation
            .key(Self::reservation_key(reservation_id))
            .key(EXPIRY_INDEX_KEY);
        for item in items {
            invocation
                .arg(item.ticket_type_id.get())
                .arg(item.total_quantity)
                .arg(item.sold_quantity)
                .arg(item.requested);
        }
        invocation
            .arg(reservation_id.to_string())
            .arg(score(expiry_after(now, ttl)))
            .arg(duration_ms(ttl.saturating_add(self.record_grace)))
            .arg(score(now))
            .arg(INLINE_RECLAIM_LIMIT);

        let mut conn = self.conn_manager.clone();
        let (flag, short_id): (i64, String) = invocation.invoke_async(&mut conn).await?;
        if flag == 1 {
            return Ok(HoldOutcome::Held);
        }

        let ticket_type_id = short_id.parse().map_err(|_| {
            GatewayError::HoldStoreError(format!("unexpected hold script reply {short_id:?}"))
        })?;
        Ok(HoldOutcome::Insufficient { ticket_type_id })
    }

    /// Reclaims every reservation due at `now`, one batch per script run.
    async fn drain_expired(&self, now: DateTime<Utc>) -> Result<usize, GatewayError> {
        let mut drained = 0;
        loop {
            let batch = self.reclaim_expired(now, INLINE_RECLAIM_LIMIT).await?;
            drained += batch;
            if batch < INLINE_RECLAIM_LIMIT {
                return Ok(drained);
            }
        }
    }

    fn hold_key(ticket_type_id: TicketTypeId) -> String {
        format!("{HOLD_KEY_PREFIX}{ticket_type_id}")
    }

    fn reservation_key(reservation_id: ReservationId) -> String {
        format!("{RESERVATION_KEY_PREFIX}{reservation_id}")
    }
}

/// Converts a timestamp into the sorted-set score used for expiry.
fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parses a flat `[field, value, field, value, ...]` reply into lines.
fn parse_lines(flat: &[String]) -> Result<Vec<ReservedLine>, GatewayError> {
    flat.chunks(2)
        .map(|pair| match pair {
            [id, quantity] => {
                let ticket_type_id = id.parse().map_err(|_| {
                    GatewayError::HoldStoreError(format!("corrupt reservation field {id:?}"))
                })?;
                let quantity = quantity.parse().map_err(|_| {
                    GatewayError::HoldStoreError(format!("corrupt reservation count {quantity:?}"))
                })?;
                Ok(ReservedLine {
                    ticket_type_id,
                    quantity,
                })
            }
            _ => Err(GatewayError::HoldStoreError(
                "odd-length reservation record".to_string(),
            )),
        })
        .collect()
}

#[async_trait]
impl HoldStore for RedisHoldStore {
    async fn attempt_hold(
        &self,
        items: &[HoldItem],
        reservation_id: ReservationId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<HoldOutcome, GatewayError> {
        if items.is_empty() {
            return Err(GatewayError::InvalidInput(
                "hold attempt needs at least one line".to_string(),
            ));
        }

        let mut outcome = self
            .run_hold_script(items, reservation_id, ttl, now)
            .await?;
        if !outcome.is_held() && self.drain_expired(now).await? > 0 {
            outcome = self
                .run_hold_script(items, reservation_id, ttl, now)
                .await?;
        }

        if outcome.is_held() {
            tracing::debug!(%reservation_id, lines = items.len(), "hold applied");
        }
        Ok(outcome)
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Vec<ReservedLine>, GatewayError> {
        let mut conn = self.conn_manager.clone();
        let flat: Vec<String> = self
            .release_script
            .key(Self::reservation_key(reservation_id))
            .key(EXPIRY_INDEX_KEY)
            .arg(reservation_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        parse_lines(&flat)
    }

    async fn held_quantity(&self, ticket_type_id: TicketTypeId) -> Result<u32, GatewayError> {
        let mut conn = self.conn_manager.clone();
        let held: Option<i64> = conn
            .hget(Self::hold_key(ticket_type_id), HELD_FIELD)
            .await?;
        Ok(held
            .map(|h| u32::try_from(h.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(0))
    }

    async fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Vec<ReservedLine>>, GatewayError> {
        let mut conn = self.conn_manager.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(Self::reservation_key(reservation_id))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let flat: Vec<String> = fields
            .into_iter()
            .flat_map(|(field, value)| [field, value])
            .collect();
        parse_lines(&flat).map(Some)
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, GatewayError> {
        let mut conn = self.conn_manager.clone();
        let reclaimed: usize = self
            .reclaim_script
            .key(EXPIRY_INDEX_KEY)
            .arg(score(now))
            .arg(i64::try_from(limit).unwrap_or(i64::MAX))
            .invoke_async(&mut conn)
            .await?;
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed expired reservations");
        }
        Ok(reclaimed)
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

//! `Redis` counter store for Box Office.
//!
//! Every counter mutation runs as a Lua script, so the check and the write
//! happen in one atomic step on the `Redis` server. No caller ever reads a
//! counter and writes it back.
//!
//! # Key layout
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `inventory:{tier}:available` | string | tickets open for new holds |
//! | `inventory:{tier}:total` | string | total capacity |
//! | `inventory:tiers` | set | every initialized tier |
//! | `reservation:{checkout_id}` | string (TTL) | JSON [`ReservationMetadata`] |
//!
//! Tier and checkout ids are restricted to `[A-Za-z0-9_-]`, so they cannot
//! smuggle a `:` into a key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use boxoffice_core::{
    BoxFuture, CheckoutId, CounterError, CounterStore, ReservationMetadata, TierId, TierInventory,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

const TIERS_KEY: &str = "inventory:tiers";

/// Script status: success, second value is the new available count.
const STATUS_OK: i64 = 0;
/// Script status: not enough tickets, second value is the current available count.
const STATUS_INSUFFICIENT: i64 = -1;
/// Script status: tier keys are missing.
const STATUS_UNKNOWN_TIER: i64 = -2;

const RESERVE_SCRIPT: &str = r"
    local available = redis.call('GET', KEYS[1])
    if not available then
        return {-2, 0}
    end
    available = tonumber(available)
    local quantity = tonumber(ARGV[1])
    if available < quantity then
        return {-1, available}
    end
    available = redis.call('DECRBY', KEYS[1], quantity)
    return {0, available}
";

const RELEASE_SCRIPT: &str = r"
    local available = redis.call('GET', KEYS[1])
    local total = redis.call('GET', KEYS[2])
    if not available or not total then
        return {-2, 0}
    end
    local released = math.min(tonumber(available) + tonumber(ARGV[1]), tonumber(total))
    redis.call('SET', KEYS[1], released)
    return {0, released}
";

const ADJUST_SCRIPT: &str = r"
    local available = redis.call('GET', KEYS[1])
    local total = redis.call('GET', KEYS[2])
    if not available or not total then
        return {-2, 0}
    end
    local delta = tonumber(ARGV[1])
    local new_total = math.max(tonumber(total) + delta, 0)
    local new_available = math.min(math.max(tonumber(available) + delta, 0), new_total)
    redis.call('SET', KEYS[2], new_total)
    redis.call('SET', KEYS[1], new_available)
    return {0, new_available}
";

/// `Redis`-backed [`CounterStore`].
///
/// # Example
///
/// ```no_run
/// use boxoffice_redis::RedisCounterStore;
/// use boxoffice_core::{CounterStore, TierId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let counters = RedisCounterStore::new("redis://127.0.0.1:6379").await?;
/// let vip = TierId::parse("VIP")?;
/// counters.initialize(&vip, 100).await?;
/// let left = counters.reserve(&vip, 2).await?;
/// assert_eq!(left, 98);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    reserve_script: Script,
    release_script: Script,
    adjust_script: Script,
}

impl RedisCounterStore {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if connection to `Redis` fails.
    pub async fn new(redis_url: &str) -> Result<Self, CounterError> {
        let client = Client::open(redis_url)
            .map_err(|e| CounterError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CounterError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            adjust_script: Script::new(ADJUST_SCRIPT),
        })
    }

    /// Round-trip a `PING`, for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if `Redis` does not answer.
    pub async fn ping(&self) -> Result<(), CounterError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(format!("Redis ping failed: {e}")))?;
        Ok(())
    }

    fn available_key(tier: &TierId) -> String {
        format!("inventory:{tier}:available")
    }

    fn total_key(tier: &TierId) -> String {
        format!("inventory:{tier}:total")
    }

    fn reservation_key(checkout_id: &CheckoutId) -> String {
        format!("reservation:{checkout_id}")
    }

    /// Run one of the counter scripts and decode its `{status, value}` reply.
    async fn run_counter_script(
        &self,
        script: &Script,
        tier: &TierId,
        arg: i64,
        operation: &'static str,
    ) -> Result<(i64, u32), CounterError> {
        let mut conn = self.conn_manager.clone();
        let (status, value): (i64, i64) = script
            .key(Self::available_key(tier))
            .key(Self::total_key(tier))
            .arg(arg)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, tier = %tier, operation, "Counter script failed");
                CounterError::Backend(format!("Failed to {operation} inventory: {e}"))
            })?;

        if status == STATUS_UNKNOWN_TIER {
            return Err(CounterError::UnknownTier(tier.clone()));
        }
        let value = u32::try_from(value)
            .map_err(|_| CounterError::Backend(format!("Counter out of range for tier {tier}: {value}")))?;
        Ok((status, value))
    }

    async fn reserve_inner(&self, tier: &TierId, quantity: u32) -> Result<u32, CounterError> {
        let (status, available) = self
            .run_counter_script(&self.reserve_script, tier, i64::from(quantity), "reserve")
            .await?;

        match status {
            STATUS_OK => {
                tracing::debug!(tier = %tier, quantity, available, "Inventory reserved");
                Ok(available)
            }
            STATUS_INSUFFICIENT => {
                metrics::counter!("counter.reserve.insufficient", "tier" => tier.to_string())
                    .increment(1);
                Err(CounterError::InsufficientInventory {
                    tier: tier.clone(),
                    requested: quantity,
                    available,
                })
            }
            other => Err(CounterError::Backend(format!(
                "Unexpected reserve script status: {other}"
            ))),
        }
    }

    async fn get_all_inner(&self) -> Result<Vec<TierInventory>, CounterError> {
        let mut conn = self.conn_manager.clone();
        let members: Vec<String> = conn
            .smembers(TIERS_KEY)
            .await
            .map_err(|e| CounterError::Backend(format!("Failed to list tiers: {e}")))?;

        let mut tiers = Vec::with_capacity(members.len());
        for member in members {
            let tier = TierId::parse(member)
                .map_err(|e| CounterError::Backend(format!("Corrupt tier in {TIERS_KEY}: {e}")))?;
            let (available, total): (Option<u32>, Option<u32>) = redis::pipe()
                .get(Self::available_key(&tier))
                .get(Self::total_key(&tier))
                .query_async(&mut conn)
                .await
                .map_err(|e| CounterError::Backend(format!("Failed to read tier {tier}: {e}")))?;

            if let (Some(available), Some(total)) = (available, total) {
                tiers.push(TierInventory {
                    tier,
                    total_capacity: total,
                    available: available.min(total),
                });
            }
        }

        tiers.sort_by(|a, b| a.tier.cmp(&b.tier));
        Ok(tiers)
    }
}

impl CounterStore for RedisCounterStore {
    fn initialize(&self, tier: &TierId, count: u32) -> BoxFuture<'_, Result<TierInventory, CounterError>> {
        let tier = tier.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = redis::pipe()
                .atomic()
                .set(Self::available_key(&tier), count)
                .ignore()
                .set(Self::total_key(&tier), count)
                .ignore()
                .sadd(TIERS_KEY, tier.as_str())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| CounterError::Backend(format!("Failed to initialize tier {tier}: {e}")))?;

            tracing::info!(tier = %tier, count, "Tier inventory initialized");

            Ok(TierInventory {
                tier,
                total_capacity: count,
                available: count,
            })
        })
    }

    fn reserve(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>> {
        let tier = tier.clone();
        Box::pin(async move { self.reserve_inner(&tier, quantity).await })
    }

    fn release(&self, tier: &TierId, quantity: u32) -> BoxFuture<'_, Result<u32, CounterError>> {
        let tier = tier.clone();
        Box::pin(async move {
            let (_, available) = self
                .run_counter_script(&self.release_script, &tier, i64::from(quantity), "release")
                .await?;
            tracing::debug!(tier = %tier, quantity, available, "Inventory released");
            Ok(available)
        })
    }

    fn adjust(&self, tier: &TierId, delta: i64) -> BoxFuture<'_, Result<u32, CounterError>> {
        let tier = tier.clone();
        Box::pin(async move {
            let (_, available) = self
                .run_counter_script(&self.adjust_script, &tier, delta, "adjust")
                .await?;
            tracing::info!(tier = %tier, delta, available, "Tier capacity adjusted");
            Ok(available)
        })
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<TierInventory>, CounterError>> {
        Box::pin(self.get_all_inner())
    }

    fn put_reservation(
        &self,
        metadata: &ReservationMetadata,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = Self::reservation_key(&metadata.checkout_id);
        let json = serde_json::to_string(metadata);
        Box::pin(async move {
            let json = json
                .map_err(|e| CounterError::Backend(format!("Failed to encode reservation: {e}")))?;
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set_ex(&key, json, ttl.as_secs().max(1))
                .await
                .map_err(|e| CounterError::Backend(format!("Failed to store reservation: {e}")))?;
            Ok(())
        })
    }

    fn get_reservation(
        &self,
        checkout_id: &CheckoutId,
    ) -> BoxFuture<'_, Result<Option<ReservationMetadata>, CounterError>> {
        let key = Self::reservation_key(checkout_id);
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let raw: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| CounterError::Backend(format!("Failed to load reservation: {e}")))?;

            raw.map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| CounterError::Backend(format!("Corrupt reservation {key}: {e}")))
            })
            .transpose()
        })
    }

    fn delete_reservation(&self, checkout_id: &CheckoutId) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = Self::reservation_key(checkout_id);
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: u32 = conn
                .del(&key)
                .await
                .map_err(|e| CounterError::Backend(format!("Failed to delete reservation: {e}")))?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_tier() {
        let tier = TierId::parse("VIP").unwrap();
        assert_eq!(RedisCounterStore::available_key(&tier), "inventory:VIP:available");
        assert_eq!(RedisCounterStore::total_key(&tier), "inventory:VIP:total");
    }
}

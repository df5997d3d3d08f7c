//! # Cursor — Shared Keyed Counter Store
//!
//! The rotation cursor is one integer shared by every coordinator process. It
//! lives in a fast key-value store with a TTL so an idle event resets rotation
//! on its own. The value is advisory: losing it only costs fairness, so all
//! writes are last-writer-wins and nothing here shares the allocation
//! transaction.
//!
//! - [`RedisCounter`]: production, `GET` / `SET key value EX ttl`.
//! - [`MemoryCounter`]: single process, used in tests and when no
//!   `REDIS_URL` is configured.
//! - [`SharedCounter`]: runtime choice between the two.

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimal get/set-with-TTL interface over a shared integer store.
pub trait CounterStore: Send + Sync + 'static {
    /// Current value, or `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Overwrite the value and reset its lifetime.
    fn set(&self, key: &str, value: i64, ttl: Duration) -> impl Future<Output = Result<()>> + Send;
}

// ── Redis ───────────────────────────────────────────────────────

/// Counter store backed by Redis through an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCounter {
    conn: ConnectionManager,
}

impl RedisCounter {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisCounter { conn })
    }
}

impl CounterStore for RedisCounter {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }
}

// ── In-process ──────────────────────────────────────────────────

/// Process-local counter store with the same expiry semantics as Redis.
#[derive(Default)]
pub struct MemoryCounter {
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<i64> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(key) {
            Some(&(value, deadline)) if Instant::now() < deadline => Some(value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&self, key: &str, value: i64, ttl: Duration) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

impl CounterStore for MemoryCounter {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.read(key))
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.write(key, value, ttl);
        Ok(())
    }
}

// ── Runtime selection ───────────────────────────────────────────

/// Counter store picked at startup from configuration.
pub enum SharedCounter {
    Redis(RedisCounter),
    Memory(MemoryCounter),
}

impl SharedCounter {
    /// Connect to Redis when a URL is given, otherwise fall back to process memory.
    ///
    /// A Redis connection failure at startup is not fatal: rotation degrades to
    /// per-process fairness instead of blocking the service.
    pub async fn from_url(redis_url: Option<&str>) -> Self {
        match redis_url {
            Some(url) => match RedisCounter::connect(url).await {
                Ok(counter) => {
                    tracing::info!("rotation cursor stored in redis");
                    SharedCounter::Redis(counter)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redis unavailable, rotation cursor kept in process memory");
                    SharedCounter::Memory(MemoryCounter::new())
                }
            },
            None => {
                tracing::info!("REDIS_URL not set, rotation cursor kept in process memory");
                SharedCounter::Memory(MemoryCounter::new())
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            SharedCounter::Redis(_) => "redis",
            SharedCounter::Memory(_) => "memory",
        }
    }
}

impl CounterStore for SharedCounter {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        match self {
            SharedCounter::Redis(c) => c.get(key).await,
            SharedCounter::Memory(c) => c.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        match self {
            SharedCounter::Redis(c) => c.set(key, value, ttl).await,
            SharedCounter::Memory(c) => c.set(key, value, ttl).await,
        }
    }
}

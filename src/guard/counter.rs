use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Invalid counter store URL: {0}")]
    Configuration(String),

    #[error("Counter store unreachable: {0}")]
    Unreachable(String),
}

impl From<redis::RedisError> for CounterError {
    fn from(e: redis::RedisError) -> Self {
        CounterError::Unreachable(e.to_string())
    }
}

/// Distributed counter/flag port backing rate limits, lockouts, and panic
/// flags. Implementations must provide atomic increment with TTL semantics;
/// callers decide fail-open/fail-closed posture on `Err`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return `(count, remaining window secs)`. The
    /// first increment starts a window of `window_secs`.
    async fn incr_with_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), CounterError>;

    /// Set a bare flag key, optionally expiring.
    async fn set_flag(&self, key: &str, ttl_secs: Option<u64>) -> Result<(), CounterError>;

    async fn flag_exists(&self, key: &str) -> Result<bool, CounterError>;

    async fn delete(&self, key: &str) -> Result<(), CounterError>;
}

/// Redis implementation over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client =
            Client::open(redis_url).map_err(|e| CounterError::Configuration(e.to_string()))?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        info!("counter store connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), CounterError> {
        let mut conn = self.connection.clone();
        // INCR and TTL in a single atomic round trip.
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1u32)
            .ttl(key)
            .query_async(&mut conn)
            .await?;

        if ttl < 0 {
            // First increment in this window: arm the expiry.
            let _: () = conn.expire(key, window_secs as i64).await?;
            return Ok((count, window_secs));
        }
        Ok((count, ttl as u64))
    }

    async fn set_flag(&self, key: &str, ttl_secs: Option<u64>) -> Result<(), CounterError> {
        let mut conn = self.connection.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, 1u8, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, 1u8).await?;
            }
        }
        Ok(())
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, CounterError> {
        let mut conn = self.connection.clone();
        Ok(conn.exists(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CounterError> {
        let mut conn = self.connection.clone();
        conn.del(key).await.map(|_: usize| ())?;
        Ok(())
    }
}

/// In-process implementation for development and tests. Not shared across
/// instances, so lockouts and limits are per-process only.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, MemoryEntry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at.map(|t| t > now).unwrap_or(true));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), CounterError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries);

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            count: 0,
            expires_at: Some(Instant::now() + Duration::from_secs(window_secs)),
        });
        entry.count += 1;
        let remaining = entry
            .expires_at
            .map(|t| t.saturating_duration_since(Instant::now()).as_secs())
            .unwrap_or(window_secs);
        Ok((entry.count, remaining.max(1)))
    }

    async fn set_flag(&self, key: &str, ttl_secs: Option<u64>) -> Result<(), CounterError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            MemoryEntry {
                count: 1,
                expires_at: ttl_secs.map(|t| Instant::now() + Duration::from_secs(t)),
            },
        );
        Ok(())
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, CounterError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries);
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CounterError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_counts_within_window() {
        let store = MemoryCounterStore::new();
        let (c1, _) = store.incr_with_window("k", 60).await.unwrap();
        let (c2, ttl) = store.incr_with_window("k", 60).await.unwrap();
        assert_eq!(c1, 1);
        assert_eq!(c2, 2);
        assert!(ttl <= 60);
    }

    #[tokio::test]
    async fn memory_store_flags() {
        let store = MemoryCounterStore::new();
        assert!(!store.flag_exists("lock").await.unwrap());
        store.set_flag("lock", Some(60)).await.unwrap();
        assert!(store.flag_exists("lock").await.unwrap());
        store.delete("lock").await.unwrap();
        assert!(!store.flag_exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryCounterStore::new();
        store.set_flag("short", Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!store.flag_exists("short").await.unwrap());
    }
}

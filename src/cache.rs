//! Cross-run state cache and run leases.
//!
//! All state shared between runs (odometer readings, baseline scalars, job
//! leases) lives behind the [`Cache`] trait: Redis in production,
//! [`MemoryCache`] for tests and cache-less development runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

/// Per-vehicle odometer map from the previous run.
pub const ODOMETER_KEY: &str = "odometer-state";
/// Cached speed baseline scalar.
pub const BASELINE_SPEED_KEY: &str = "baseline-speed";
/// Cached distance baseline scalar.
pub const BASELINE_DISTANCE_KEY: &str = "baseline-distance";

/// Guarded compare-and-delete so only the lease holder can release it.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("cached value could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key` with an absolute time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Atomically take `key` if nobody holds it. Returns `false` when the
    /// key is already held; the existing lease and its TTL are untouched.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Release `key` if it still carries `token`. A mismatched or expired
    /// lease is left alone.
    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError>;
}

pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache with the same expiry and lease semantics as Redis.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|_, e| e.expires_at > Instant::now());
        f(&mut entries)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.with_entries(|entries| entries.get(key).map(|e| e.value.clone())))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Instant::now() + ttl,
                },
            );
        });
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: token.to_string(),
                    expires_at: Instant::now() + ttl,
                },
            );
            true
        }))
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        self.with_entries(|entries| {
            if entries.get(key).is_some_and(|e| e.value == token) {
                entries.remove(key);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set_roundtrip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_memory_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_excludes_second_holder() {
        let cache = MemoryCache::new();
        assert!(cache.try_lock("l", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.try_lock("l", "b", Duration::from_secs(60)).await.unwrap());

        cache.unlock("l", "a").await.unwrap();
        assert!(cache.try_lock("l", "b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_requires_matching_token() {
        let cache = MemoryCache::new();
        assert!(cache.try_lock("l", "a", Duration::from_secs(60)).await.unwrap());
        cache.unlock("l", "other").await.unwrap();
        // Still held by "a".
        assert!(!cache.try_lock("l", "b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_retaken() {
        let cache = MemoryCache::new();
        assert!(cache.try_lock("l", "a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.try_lock("l", "b", Duration::from_secs(60)).await.unwrap());
    }
}

//! Cache-aside store mapping user → ranked recommendation list with TTL.
//!
//! Key scheme: `recommendations:{user_id}`. The value is a JSON envelope
//! carrying the list and a write timestamp. A malformed cached value is
//! treated as a miss, never surfaced as an error to the request path.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use benerec_common::{EngineError, RankedItem, UserId};

#[async_trait]
pub trait RecommendationCache: Send + Sync {
    /// Returns the cached ranked list, or `None` on miss (including expiry
    /// and malformed values). `Err` means the cache itself was unreachable.
    async fn get(&self, user_id: &UserId) -> Result<Option<Vec<RankedItem>>>;

    async fn put(&self, user_id: &UserId, items: &[RankedItem]) -> Result<()>;

    async fn clear(&self, user_id: &UserId) -> Result<()>;
}

fn cache_key(user_id: &UserId) -> String {
    format!("recommendations:{user_id}")
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    user_id: UserId,
    recommendations: Vec<RankedItem>,
    timestamp: i64,
}

// --- Redis ---

pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EngineError::Connectivity(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| EngineError::Connectivity(format!("redis: {e}")))?;
        info!(ttl_secs, "Connected to Redis recommendation cache");
        Ok(Self { conn, ttl_secs })
    }
}

#[async_trait]
impl RecommendationCache for RedisCache {
    async fn get(&self, user_id: &UserId) -> Result<Option<Vec<RankedItem>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(cache_key(user_id)).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEnvelope>(&raw) {
            Ok(envelope) => {
                debug!(user_id = %envelope.user_id, written_at = envelope.timestamp, "Recommendation cache hit");
                Ok(Some(envelope.recommendations))
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Malformed cache entry, treating as miss");
                Ok(None)
            }
        }
    }

    async fn put(&self, user_id: &UserId, items: &[RankedItem]) -> Result<()> {
        let envelope = CacheEnvelope {
            user_id: user_id.clone(),
            recommendations: items.to_vec(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let value = serde_json::to_string(&envelope)?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(cache_key(user_id), value, self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(cache_key(user_id)).await?;
        Ok(())
    }
}

// --- In-memory (tests, local runs without Redis) ---

pub struct MemoryCache {
    entries: Mutex<HashMap<UserId, (Vec<RankedItem>, Instant)>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl RecommendationCache for MemoryCache {
    async fn get(&self, user_id: &UserId) -> Result<Option<Vec<RankedItem>>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(user_id) {
            Some((items, written_at)) if written_at.elapsed() < self.ttl => {
                Ok(Some(items.clone()))
            }
            Some(_) => {
                entries.remove(user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, user_id: &UserId, items: &[RankedItem]) -> Result<()> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(user_id.clone(), (items.to_vec(), Instant::now()));
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benerec_common::ItemId;

    fn ranked(ids: &[&str]) -> Vec<RankedItem> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedItem {
                item_id: ItemId::from(*id),
                score: 1.0 - i as f64 * 0.1,
                rank: i as u32 + 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let user: UserId = "u1".into();
        let items = ranked(&["a", "b", "c"]);

        cache.put(&user, &items).await.unwrap();
        assert_eq!(cache.get(&user).await.unwrap(), Some(items));
    }

    #[tokio::test]
    async fn memory_cache_expires() {
        let cache = MemoryCache::new(Duration::ZERO);
        let user: UserId = "u1".into();

        cache.put(&user, &ranked(&["a"])).await.unwrap();
        assert_eq!(cache.get(&user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_cache_clear_removes_entry() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let user: UserId = "u1".into();

        cache.put(&user, &ranked(&["a"])).await.unwrap();
        cache.clear(&user).await.unwrap();
        assert_eq!(cache.get(&user).await.unwrap(), None);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = CacheEnvelope {
            user_id: "u1".into(),
            recommendations: ranked(&["a", "b"]),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: CacheEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.recommendations, envelope.recommendations);
        assert_eq!(back.user_id, envelope.user_id);
    }

    #[test]
    fn key_scheme_is_prefixed() {
        assert_eq!(cache_key(&"u42".into()), "recommendations:u42");
    }
}

use crate::errors::{AppError, Result};
use crate::rate_limit::store::{AdmitDecision, RateLimitKey, WindowStore};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, Script};

/// Atomic sliding window operation over a sorted set
///
/// Runs entirely server-side so that concurrent callers against the same
/// key are serialized by Redis: purge aged entries, count the survivors,
/// and only then conditionally admit. Splitting this into client round
/// trips would let two callers both observe `count < limit` and both admit.
///
/// The member combines the caller timestamp with server-time microseconds
/// so that simultaneous admissions from different processes never collide.
static CHECK_AND_ADMIT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window_start = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        local ttl = tonumber(ARGV[4])

        -- Drop entries that fell out of the sliding window
        redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. window_start)

        local current = redis.call('ZCARD', key)

        if current < limit then
            local member = string.format('%.6f-%s', now, redis.call('TIME')[2])
            redis.call('ZADD', key, now, member)
            redis.call('EXPIRE', key, ttl)

            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            return {1, current + 1, tostring(oldest[2])}
        end

        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        if #oldest > 0 then
            return {0, current, tostring(oldest[2])}
        end
        return {0, current, ''}
        "#,
    )
});

/// Sliding window store backed by Redis sorted sets
///
/// The connection manager is multiplexed and cloned per operation, so the
/// store is shared freely across request tasks without a lock.
pub struct RedisWindowStore {
    manager: ConnectionManager,
}

impl RedisWindowStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn check_and_admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window_seconds: u64,
        now: f64,
    ) -> Result<AdmitDecision> {
        let window_start = now - window_seconds as f64;
        // TTL beyond the logical window so abandoned keys self-clean
        let ttl = window_seconds * 2;

        let mut conn = self.manager.clone();
        let (admitted, count, oldest_raw): (i64, u64, String) = CHECK_AND_ADMIT
            .key(key.to_string())
            .arg(now)
            .arg(window_start)
            .arg(limit)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;

        let oldest = if oldest_raw.is_empty() {
            None
        } else {
            Some(oldest_raw.parse::<f64>().map_err(|e| {
                AppError::Internal(format!("Malformed window entry score: {}", e))
            })?)
        };

        Ok(AdmitDecision {
            admitted: admitted == 1,
            count,
            oldest,
        })
    }

    async fn window_entries(&self, key: &RateLimitKey, window_start: f64) -> Result<Vec<f64>> {
        use redis::AsyncCommands;

        let mut conn = self.manager.clone();
        let entries: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(key.to_string(), window_start, "+inf")
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::TypeError {
                    AppError::StatisticsCorrupt(e.to_string())
                } else {
                    AppError::Redis(e)
                }
            })?;

        Ok(entries.into_iter().map(|(_, score)| score).collect())
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<()> {
        use redis::AsyncCommands;

        let mut conn = self.manager.clone();
        let _: () = conn.del(key.to_string()).await?;

        tracing::info!(key = %key, "Rate limit window reset");

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::unix_now;

    async fn test_store() -> RedisWindowStore {
        let config = crate::config::RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout_seconds: 5,
        };

        let manager = crate::redis::create_client(&config).await.unwrap();
        RedisWindowStore::new(manager)
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_check_and_admit_basic() {
        let store = test_store().await;
        let key = RateLimitKey::new("window-basic", "test");

        store.reset(&key).await.unwrap();

        let now = unix_now().unwrap();
        let decision = store.check_and_admit(&key, 5, 60, now).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.count, 1);
        assert!(decision.oldest.is_some());

        let decision = store.check_and_admit(&key, 5, 60, now).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.count, 2);

        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_check_and_admit_limit_exceeded() {
        let store = test_store().await;
        let key = RateLimitKey::new("window-exceeded", "test");

        store.reset(&key).await.unwrap();

        for i in 1..=3 {
            let now = unix_now().unwrap();
            let decision = store.check_and_admit(&key, 3, 60, now).await.unwrap();
            assert!(decision.admitted, "Request {} should be admitted", i);
        }

        let now = unix_now().unwrap();
        let decision = store.check_and_admit(&key, 3, 60, now).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.count, 3);
        let oldest = decision.oldest.unwrap();
        assert!(oldest <= now && oldest > now - 60.0);

        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_window_entries_and_reset() {
        let store = test_store().await;
        let key = RateLimitKey::new("window-entries", "test");

        store.reset(&key).await.unwrap();

        let now = unix_now().unwrap();
        store.check_and_admit(&key, 10, 60, now).await.unwrap();
        store.check_and_admit(&key, 10, 60, now).await.unwrap();

        let entries = store.window_entries(&key, now - 60.0).await.unwrap();
        assert_eq!(entries.len(), 2);

        store.reset(&key).await.unwrap();
        let entries = store.window_entries(&key, now - 60.0).await.unwrap();
        assert!(entries.is_empty());
    }
}

use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};

/// Thin wrapper over the shared Redis store.
///
/// Every cross-request counter, window, queue, and blacklist entry lives here
/// so the gating components stay stateless and can run on any number of
/// server instances. Each method is a single round trip; atomicity of the
/// individual commands is what the gates rely on.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis from a connection URL.
    ///
    /// Production deployments must use an authenticated URL
    /// (redis://:password@host:port or rediss:// for TLS).
    pub async fn new(redis_url: &str) -> Result<Self> {
        if !redis_url.contains("://") {
            return Err(anyhow::anyhow!(
                "Invalid Redis URL format. Expected: redis://:password@host:port"
            ));
        }

        if !redis_url.contains('@') {
            eprintln!("WARNING: Redis URL does not include a password");
            eprintln!("For production, use redis://:yourpassword@host:port in REDIS_URL");
        }

        let client = Client::open(redis_url).context("Failed to create Redis client from URL")?;

        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager - check REDIS_URL")?;

        Ok(Self { manager })
    }

    /// Set a key without expiration (used for blacklist entries, which are
    /// only ever removed by explicit cleanup, never by TTL)
    pub async fn set(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.set(key, value).await
    }

    /// Set a key-value pair with an expiration time (in seconds)
    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, seconds).await
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.get(key).await
    }

    /// Increment a key by 1 and return the new value
    pub async fn incr(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await
    }

    /// Increment a key by an arbitrary amount and return the new value
    /// (used for cumulative daily transaction amounts)
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.incr(key, amount).await
    }

    /// Delete a key
    pub async fn del(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.del(key).await
    }

    /// Set expiration on a key
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.expire(key, seconds).await
    }

    /// Get all keys matching a pattern (admin enumeration only; never called
    /// on the request path)
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await
    }

    /// Add a member to a sorted set with a score (sliding windows)
    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await
    }

    /// Remove sorted-set members with scores in the given range
    pub async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await
    }

    /// Count sorted-set members with scores in the given range
    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zcount(key, min, max).await
    }

    /// Get a range from a sorted set with scores
    pub async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
    }

    /// Push a value onto the head of a list (queues and audit logs)
    pub async fn lpush(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.lpush(key, value).await
    }

    /// Get a range of list values
    pub async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start, stop).await
    }

    /// Remove up to `count` occurrences of an exact value from a list.
    /// Returns the number removed. This is the conditional
    /// remove-by-content operation the review queue relies on.
    pub async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.lrem(key, count, value).await
    }

    /// Ping Redis to check if the connection is alive
    pub async fn ping(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|resp| resp == "PONG")
    }
}

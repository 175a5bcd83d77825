//! Store contract consumed by the gating components. The production
//! implementation is [`RedisClient`]; tests use the in-memory double so gate
//! semantics are exercised without a live Redis.

use crate::redis_client::RedisClient;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn expire(&self, key: &str, seconds: i64) -> Result<bool>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;
    async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<i64>;
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64>;
    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>>;
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<i64>;
}

#[async_trait]
impl Store for RedisClient {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        Ok(RedisClient::set(self, key, value).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(RedisClient::get(self, key).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        Ok(RedisClient::incr(self, key).await?)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        Ok(RedisClient::incr_by(self, key, amount).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        Ok(RedisClient::del(self, key).await?)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        Ok(RedisClient::expire(self, key, seconds).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(RedisClient::keys(self, pattern).await?)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        Ok(RedisClient::zadd(self, key, score, member).await?)
    }

    async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<i64> {
        Ok(RedisClient::zrembyscore(self, key, min, max).await?)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64> {
        Ok(RedisClient::zcount(self, key, min, max).await?)
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        Ok(RedisClient::zrange_withscores(self, key, start, stop).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        Ok(RedisClient::lpush(self, key, value).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        Ok(RedisClient::lrange(self, key, start, stop).await?)
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<i64> {
        Ok(RedisClient::lrem(self, key, count, value).await?)
    }
}

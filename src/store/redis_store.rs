//! Redis-backed key-value store.
//!
//! All keys are namespaced with a configurable prefix so several deployments
//! can share one Redis instance.

use super::KvStore;
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{info, instrument};

/// Redis key-value store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis at `url`, namespacing keys with `prefix`.
    #[instrument(skip_all)]
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis key-value store");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::millis(ttl));
        }
        let _: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(key)).await?;
        Ok(exists)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let value: i64 = conn.incr(&key, 1).await?;
        if value == 1 {
            if let Some(ttl) = ttl {
                let _: bool = conn.pexpire(&key, Self::millis(ttl) as i64).await?;
            }
        }
        Ok(value)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.rpush(self.key(list), value).await?;
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.lpop(self.key(list), None::<NonZeroUsize>).await?;
        Ok(value)
    }

    async fn list_remove(&self, list: &str, value: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(self.key(list), 0, value).await?;
        Ok(removed)
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(self.key(list)).await?;
        Ok(len)
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.zadd(self.key(set), member, score).await?;
        Ok(())
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.zrem(self.key(set), member).await?;
        Ok(removed > 0)
    }

    async fn zrange_by_score(&self, set: &str, max: i64, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(self.key(set), "-inf", max, 0, limit as isize)
            .await?;
        Ok(members)
    }

    async fn zcard(&self, set: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(self.key(set)).await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

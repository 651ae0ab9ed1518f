//! Redis-backed lock table and delay queue.
//!
//! Locks are plain string keys set with `SET key token NX PX ttl` and deleted
//! through a token-checking Lua script. The delay queue is the sorted set
//! [`DELAY_QUEUE_KEY`], scored by due time in epoch seconds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::{DELAY_QUEUE_KEY, DelayQueue, DelayQueueEntry, LockBackend, Result, due_score};

/// Deletes the key only when it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Coordination store shared by every engine instance.
#[derive(Clone)]
pub struct RedisCoordinator {
    conn_manager: ConnectionManager,
    queue_key: String,
}

impl RedisCoordinator {
    /// Connects to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;

        Ok(Self {
            conn_manager,
            queue_key: DELAY_QUEUE_KEY.to_string(),
        })
    }

    /// Uses a different sorted-set key for the delay queue.
    pub fn with_queue_key(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = queue_key.into();
        self
    }
}

#[async_trait]
impl LockBackend for RedisCoordinator {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }
}

#[async_trait]
impl DelayQueue for RedisCoordinator {
    async fn enqueue(&self, entry: DelayQueueEntry, due_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .zadd(&self.queue_key, entry.member(), due_score(due_at))
            .await?;

        tracing::debug!(%entry, due_at = %due_at, "enqueued order timeout");
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DelayQueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let count = isize::try_from(limit).unwrap_or(isize::MAX);

        let members: Vec<String> = conn
            .zrangebyscore_limit(&self.queue_key, "-inf", now.timestamp(), 0, count)
            .await?;

        let mut entries = Vec::with_capacity(members.len());
        for member in members {
            match member.parse::<DelayQueueEntry>() {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(%member, error = %e, "dropping malformed delay queue member");
                    let _: i64 = conn.zrem(&self.queue_key, &member).await?;
                }
            }
        }
        Ok(entries)
    }

    async fn claim(&self, entry: &DelayQueueEntry) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        let removed: i64 = conn.zrem(&self.queue_key, entry.member()).await?;
        Ok(removed == 1)
    }

    async fn len(&self) -> Result<u64> {
        let mut conn = self.conn_manager.clone();

        let count: u64 = conn.zcard(&self.queue_key).await?;
        Ok(count)
    }
}

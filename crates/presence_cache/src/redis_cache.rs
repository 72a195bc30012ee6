use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::info;

use crate::{CacheError, PresenceCache};

/// Presence cache backed by Redis `SET EX` / `GET` / `DEL`, with a Lua
/// compare-and-delete for conditional removal. The connection
/// manager reconnects on its own after a dropped link.
#[derive(Clone)]
pub struct RedisPresenceCache {
    conn: ConnectionManager,
}

impl RedisPresenceCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis presence cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceCache for RedisPresenceCache {
    async fn set(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let script = redis::Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            ",
        );
        let mut conn = self.conn.clone();
        let deleted: i64 = script.key(key).arg(expected).invoke_async(&mut conn).await?;
        Ok(deleted > 0)
    }
}

//! TTL-keyed presence records kept outside the process.
//!
//! The cache is a recovery aid: callers write it on registration and clear it
//! on disconnect, and the TTL bounds how stale an entry can get when a client
//! vanishes without a clean disconnect.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{ConnectionId, UserId};
use thiserror::Error;

mod memory;
mod redis_cache;

pub use memory::MemoryPresenceCache;
pub use redis_cache::RedisPresenceCache;

pub const PRESENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("presence cache backend error: {0}")]
    Backend(String),
    #[error("presence entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Key/value contract of the external presence store.
#[async_trait]
pub trait PresenceCache: Send + Sync {
    async fn set(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Deletes `key` only while it still holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub connection_handle: ConnectionId,
    pub display_name: String,
}

impl PresenceEntry {
    pub fn encode(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }
}

pub async fn store_presence(
    cache: &dyn PresenceCache,
    user_id: &UserId,
    entry: &PresenceEntry,
    ttl: Duration,
) -> Result<(), CacheError> {
    cache.set(user_id.as_str(), ttl, entry.encode()?).await
}

pub async fn load_presence(
    cache: &dyn PresenceCache,
    user_id: &UserId,
) -> Result<Option<PresenceEntry>, CacheError> {
    cache
        .get(user_id.as_str())
        .await?
        .map(|raw| PresenceEntry::decode(&raw))
        .transpose()
}

/// Deletes the entry of `user_id` unless it names a connection other than
/// `owner`. Returns whether an entry was deleted. An entry that cannot be
/// decoded is deleted as well.
pub async fn clear_presence(
    cache: &dyn PresenceCache,
    user_id: &UserId,
    owner: ConnectionId,
) -> Result<bool, CacheError> {
    let Some(raw) = cache.get(user_id.as_str()).await? else {
        return Ok(false);
    };
    match PresenceEntry::decode(&raw) {
        Ok(entry) if entry.connection_handle != owner => Ok(false),
        _ => cache.delete_if_eq(user_id.as_str(), &raw).await,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

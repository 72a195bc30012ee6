use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{sync::Mutex, time};
use tracing::debug;

use crate::{CacheError, PresenceCache};

struct CachedValue {
    value: String,
    expires_at: Instant,
}

/// In-process stand-in for the external cache, used when no cache URL is
/// configured. Entries expire on read, and [`run_purge`](Self::run_purge)
/// sweeps the ones nobody reads again.
#[derive(Default)]
pub struct MemoryPresenceCache {
    entries: Mutex<HashMap<String, CachedValue>>,
}

impl MemoryPresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at > now);
        before - entries.len()
    }

    /// Purges expired entries every `every` until the task is aborted.
    pub async fn run_purge(self: Arc<Self>, every: Duration) {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let purged = self.purge_expired().await;
            if purged > 0 {
                debug!(purged, "expired presence entries purged");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl PresenceCache for MemoryPresenceCache {
    async fn set(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), CachedValue { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(cached) if cached.expires_at > Instant::now() => Ok(Some(cached.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(cached) if cached.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

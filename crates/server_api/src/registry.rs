use std::collections::HashMap;

use async_trait::async_trait;
use shared::domain::{ConnectionId, UserId};
use tokio::sync::RwLock;

use crate::connection::{ConnectionHandle, ConnectionRecord};

/// Maps a user to the connection currently serving them.
///
/// `put` overwrites: the most recent registration of a user wins. There is no
/// eviction besides `remove`.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn put(&self, user_id: UserId, handle: ConnectionHandle, display_name: String);
    async fn get(&self, user_id: &UserId) -> Option<ConnectionRecord>;
    async fn remove(&self, user_id: &UserId) -> Option<ConnectionRecord>;
    /// Removes the record of `user_id` only if it still points at
    /// `connection`, as one step. Returns whether it was removed.
    async fn remove_if(&self, user_id: &UserId, connection: ConnectionId) -> bool;
}

#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    records: RwLock<HashMap<UserId, ConnectionRecord>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn put(&self, user_id: UserId, handle: ConnectionHandle, display_name: String) {
        let record = ConnectionRecord {
            user_id: user_id.clone(),
            handle,
            display_name,
        };
        self.records.write().await.insert(user_id, record);
    }

    async fn get(&self, user_id: &UserId) -> Option<ConnectionRecord> {
        self.records.read().await.get(user_id).cloned()
    }

    async fn remove(&self, user_id: &UserId) -> Option<ConnectionRecord> {
        self.records.write().await.remove(user_id)
    }

    async fn remove_if(&self, user_id: &UserId, connection: ConnectionId) -> bool {
        let mut records = self.records.write().await;
        match records.get(user_id) {
            Some(record) if record.handle.id() == connection => {
                records.remove(user_id);
                true
            }
            _ => false,
        }
    }
}

use std::{sync::Arc, time::Duration};

use presence_cache::{MemoryPresenceCache, PresenceCache, PRESENCE_TTL};
use storage::Storage;

mod chat;
mod connection;
mod events;
mod lifecycle;
mod registry;
mod rooms;

pub use chat::{create_chat, send_message};
pub use connection::{ConnectionHandle, ConnectionRecord};
pub use events::{dispatch, reject};
pub use lifecycle::{register, Session};
pub use registry::{ConnectionRegistry, InMemoryConnectionRegistry};
pub use rooms::RoomRouter;

/// Everything a handler needs: durable storage, the presence cache and the
/// process-local routing state.
#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub presence: Arc<dyn PresenceCache>,
    pub presence_ttl: Duration,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub rooms: RoomRouter,
}

impl ApiContext {
    /// Context with an in-process presence cache and registry.
    pub fn new(storage: Storage) -> Self {
        Self::with_presence(storage, Arc::new(MemoryPresenceCache::new()), PRESENCE_TTL)
    }

    pub fn with_presence(
        storage: Storage,
        presence: Arc<dyn PresenceCache>,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            presence,
            presence_ttl,
            registry: Arc::new(InMemoryConnectionRegistry::new()),
            rooms: RoomRouter::new(),
        }
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod lifecycle_tests;

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod chat_tests;

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod events_tests;

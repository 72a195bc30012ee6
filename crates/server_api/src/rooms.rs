use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use shared::{
    domain::{ConnectionId, RoomId},
    protocol::ServerEvent,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::ConnectionHandle;

type Members = HashMap<ConnectionId, ConnectionHandle>;

/// Groups connections into named rooms. Membership is not persisted: a
/// connection leaves every room when it goes away and must rejoin after
/// reconnecting.
#[derive(Clone, Default)]
pub struct RoomRouter {
    rooms: Arc<RwLock<HashMap<RoomId, Members>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle` to `room`. Returns `false` if it was already a member.
    pub async fn join(&self, handle: &ConnectionHandle, room: RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room).or_default();
        if members.contains_key(&handle.id()) {
            return false;
        }
        members.insert(handle.id(), handle.clone());
        true
    }

    /// Delivers `event` to every member of `room` except `exclude`, returning
    /// how many connections accepted it.
    pub async fn emit(
        &self,
        room: &RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            debug!(%room, "emit to empty room");
            return 0;
        };

        members
            .values()
            .filter(|handle| Some(handle.id()) != exclude)
            .filter(|handle| handle.deliver(event.clone()))
            .count()
    }

    /// Like [`emit`](Self::emit) across several rooms; a connection that sits
    /// in more than one of them receives the event once.
    pub async fn emit_any(
        &self,
        rooms: &[RoomId],
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let guard = self.rooms.read().await;
        let mut seen = HashSet::new();
        rooms
            .iter()
            .filter_map(|room| guard.get(room))
            .flat_map(|members| members.values())
            .filter(|handle| Some(handle.id()) != exclude)
            .filter(|handle| seen.insert(handle.id()))
            .filter(|handle| handle.deliver(event.clone()))
            .count()
    }

    /// Removes the connection from every room it joined and drops rooms left
    /// empty. Returns the number of rooms it was removed from.
    pub async fn leave_all(&self, connection: ConnectionId) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut left = 0;
        rooms.retain(|_, members| {
            if members.remove(&connection).is_some() {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(HashMap::len)
            .unwrap_or_default()
    }

    pub async fn is_member(&self, room: &RoomId, connection: ConnectionId) -> bool {
        self.rooms
            .read()
            .await
            .get(room)
            .is_some_and(|members| members.contains_key(&connection))
    }
}

use presence_cache::{clear_presence, store_presence, PresenceEntry};
use shared::{
    domain::{Notification, RoomId, UserId},
    error::ChatError,
    protocol::RegisterCommand,
};
use tracing::{debug, info, warn};

use crate::{connection::ConnectionHandle, ApiContext};

/// Per-connection presence state. A session starts disconnected and becomes
/// connected once a registration succeeds; the registered user id is the tag
/// used for cleanup when the transport goes away.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    user_id: Option<UserId>,
    joined_unregistered: Vec<String>,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            user_id: None,
            joined_unregistered: Vec::new(),
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.user_id.is_some()
    }

    /// Announces the connection's identity and returns the notifications that
    /// piled up while the user was away.
    pub async fn register(
        &mut self,
        ctx: &ApiContext,
        command: RegisterCommand,
    ) -> Result<Vec<Notification>, ChatError> {
        if let Some(previous) = self.user_id.clone() {
            if previous != command.user_id {
                release(ctx, &self.handle, &previous).await;
                self.user_id = None;
            }
        }

        let pending = register(ctx, &self.handle, &command).await?;
        self.user_id = Some(command.user_id);
        for raw in std::mem::take(&mut self.joined_unregistered) {
            self.join_room(ctx, &raw).await;
        }
        Ok(pending)
    }

    /// Rooms a room name announced by this connection resolves to. Before
    /// registration the name is taken as is.
    pub fn rooms_for(&self, raw: &str) -> Vec<RoomId> {
        match &self.user_id {
            Some(member) => RoomId::candidates_for_member(raw, member),
            None => vec![RoomId::from(raw)],
        }
    }

    /// Joins every room `raw` resolves to and returns how many were new.
    /// Names joined before registration are resolved again once the
    /// connection registers.
    pub async fn join_room(&mut self, ctx: &ApiContext, raw: &str) -> usize {
        if !self.is_registered() && !self.joined_unregistered.iter().any(|r| r == raw) {
            self.joined_unregistered.push(raw.to_string());
        }
        let mut joined = 0;
        for room in self.rooms_for(raw) {
            if ctx.rooms.join(&self.handle, room).await {
                joined += 1;
            }
        }
        joined
    }

    /// Runs disconnect cleanup. Untagged sessions only leave their rooms.
    pub async fn disconnect(self, ctx: &ApiContext, reason: Option<&str>) {
        let left = ctx.rooms.leave_all(self.handle.id()).await;
        let Some(user_id) = self.user_id else {
            debug!(
                connection_id = %self.handle.id(),
                reason = reason.unwrap_or("none"),
                rooms_left = left,
                "unregistered connection closed"
            );
            return;
        };

        release(ctx, &self.handle, &user_id).await;
        info!(
            %user_id,
            connection_id = %self.handle.id(),
            reason = reason.unwrap_or("none"),
            rooms_left = left,
            "user disconnected"
        );
    }
}

pub async fn register(
    ctx: &ApiContext,
    handle: &ConnectionHandle,
    command: &RegisterCommand,
) -> Result<Vec<Notification>, ChatError> {
    if command.user_id.as_str().trim().is_empty() || command.name.trim().is_empty() {
        return Err(ChatError::InvalidRegistration);
    }

    let pending = ctx
        .storage
        .find_pending(&command.user_id)
        .await
        .map_err(ChatError::store)?;

    let entry = PresenceEntry {
        connection_handle: handle.id(),
        display_name: command.name.clone(),
    };
    if let Err(error) =
        store_presence(ctx.presence.as_ref(), &command.user_id, &entry, ctx.presence_ttl).await
    {
        warn!(user_id = %command.user_id, %error, "failed to write presence cache entry");
    }

    ctx.registry
        .put(command.user_id.clone(), handle.clone(), command.name.clone())
        .await;

    info!(
        user_id = %command.user_id,
        connection_id = %handle.id(),
        pending = pending.len(),
        "user registered"
    );
    Ok(pending)
}

/// Drops the registry entry and presence record of `user_id` if they still
/// belong to `handle`. A newer registration from another connection is left
/// alone.
async fn release(ctx: &ApiContext, handle: &ConnectionHandle, user_id: &UserId) {
    if !ctx.registry.remove_if(user_id, handle.id()).await {
        debug!(%user_id, connection_id = %handle.id(), "registry entry not owned by this connection");
        return;
    }

    match clear_presence(ctx.presence.as_ref(), user_id, handle.id()).await {
        Ok(true) => {}
        Ok(false) => debug!(%user_id, "presence entry owned by newer connection"),
        Err(error) => warn!(%user_id, %error, "failed to delete presence cache entry"),
    }
}

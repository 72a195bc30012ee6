use serde_json::Value;
use shared::{
    error::ApiError,
    protocol::{
        AckFrame, ClientEvent, ClientFrame, EventKind, RegisterResponse, RejectedFrame,
        SendMessageResponse, ServerEvent, TypingIndicator,
    },
};
use tracing::{debug, info, warn};

use crate::{chat, lifecycle::Session, ApiContext};

/// Routes one decoded frame. The returned event, if any, is the direct
/// response for the requesting connection; fan-out to other connections
/// happens inside the handlers.
pub async fn dispatch(
    ctx: &ApiContext,
    session: &mut Session,
    frame: ClientFrame,
) -> Option<ServerEvent> {
    let ack = frame.ack;
    match frame.event {
        ClientEvent::Register(command) => {
            let response = match session.register(ctx, command).await {
                Ok(pending) => RegisterResponse::Pending(pending),
                Err(err) => {
                    warn!(connection_id = %session.handle().id(), %err, "registration failed");
                    RegisterResponse::Failed {
                        error: err.to_string(),
                    }
                }
            };
            Some(ack_event(EventKind::Register, ack, response))
        }
        ClientEvent::SendMessage(command) => {
            let response = match chat::send_message(ctx, &command).await {
                Ok(message) => SendMessageResponse::Sent(message),
                Err(err) => {
                    warn!(sender_id = %command.sender_id, %err, "send message failed");
                    SendMessageResponse::failed(&err)
                }
            };
            Some(ack_event(EventKind::SendMessage, ack, response))
        }
        ClientEvent::JoinRoom { room_id } => {
            let joined = session.join_room(ctx, &room_id).await;
            info!(connection_id = %session.handle().id(), room = %room_id, joined, "joined room");
            None
        }
        ClientEvent::Typing { room_id, payload } => {
            relay_typing(ctx, session, true, room_id, payload).await;
            None
        }
        ClientEvent::StopTyping { room_id, payload } => {
            relay_typing(ctx, session, false, room_id, payload).await;
            None
        }
    }
}

/// Turns a frame that failed validation into the event sent back to its
/// connection. Requests with a response channel get a failed response;
/// everything else gets an `error` event.
pub fn reject(rejected: RejectedFrame) -> ServerEvent {
    debug!(reason = %rejected.reason, "rejected inbound frame");
    match (rejected.kind, rejected.reason) {
        (Some(EventKind::Register), reason) => ack_event(
            EventKind::Register,
            rejected.ack,
            RegisterResponse::Failed {
                error: reason.to_string(),
            },
        ),
        (Some(EventKind::SendMessage), reason) => ack_event(
            EventKind::SendMessage,
            rejected.ack,
            SendMessageResponse::Failed {
                error: true,
                message: reason.to_string(),
            },
        ),
        (_, reason) => ServerEvent::Error(ApiError::from(reason)),
    }
}

async fn relay_typing(
    ctx: &ApiContext,
    session: &Session,
    typing: bool,
    room_id: Option<String>,
    payload: Value,
) {
    let Some(raw) = room_id else {
        debug!(connection_id = %session.handle().id(), typing, "typing indicator without room dropped");
        return;
    };
    let rooms = session.rooms_for(&raw);
    let room_id = rooms.first().map(|room| room.as_str().to_string());

    let indicator = TypingIndicator {
        typing,
        room_id,
        payload,
    };
    let delivered = ctx
        .rooms
        .emit_any(
            &rooms,
            ServerEvent::Display(indicator),
            Some(session.handle().id()),
        )
        .await;
    debug!(room = %raw, typing, delivered, "typing indicator relayed");
}

fn ack_event(kind: EventKind, id: Option<u64>, response: impl serde::Serialize) -> ServerEvent {
    ServerEvent::Ack(AckFrame::new(kind, id, response))
}

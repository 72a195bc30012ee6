use chrono::Utc;
use shared::{
    domain::{
        Conversation, Message, NewConversation, NewMessage, NewNotification, ParticipantModel,
        RoomId, UserId,
    },
    error::ChatError,
    protocol::{NotificationPush, SendMessageCommand, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::ApiContext;

/// Opens (or returns the existing) conversation between two participants.
pub async fn create_chat(
    ctx: &ApiContext,
    sender_id: Option<&UserId>,
    receiver_id: Option<&UserId>,
    sender_model: ParticipantModel,
    receiver_model: ParticipantModel,
) -> Result<Conversation, ChatError> {
    let sender_id = present(sender_id).ok_or(ChatError::MissingSender)?;
    let receiver_id = present(receiver_id).ok_or(ChatError::MissingReceiver)?;
    if sender_id == receiver_id {
        return Err(ChatError::SelfChat);
    }

    resolve_conversation(ctx, sender_id, receiver_id, sender_model, receiver_model, "").await
}

/// Handles one inbound send: persists the message, refreshes the
/// conversation summary, then fans the message out to the room and notifies
/// the receiver. Only the persistence steps can fail the call.
pub async fn send_message(
    ctx: &ApiContext,
    command: &SendMessageCommand,
) -> Result<Message, ChatError> {
    let content = command.raw_content.trim();
    if content.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    let sender_id = present(Some(&command.sender_id)).ok_or(ChatError::MissingSender)?;
    let receiver_id = present(Some(&command.receiver_id)).ok_or(ChatError::MissingReceiver)?;
    if sender_id == receiver_id {
        return Err(ChatError::SelfChat);
    }

    let conversation = resolve_conversation(
        ctx,
        sender_id,
        receiver_id,
        command.sender_model,
        command.receiver_model,
        content,
    )
    .await?;

    let message = ctx
        .storage
        .create_message(&NewMessage {
            chat_id: conversation.id,
            sender_id: sender_id.clone(),
            sender_model: command.sender_model,
            message_content: content.to_string(),
            sended_time: Utc::now(),
        })
        .await
        .map_err(ChatError::store)?;

    ctx.storage
        .update_last_message(&message)
        .await
        .map_err(ChatError::store)?
        .ok_or(ChatError::ConversationNotFound)?;

    let room = match command.room_id.as_deref() {
        Some(raw) => RoomId::canonicalize(raw, sender_id, receiver_id),
        None => RoomId::for_participants(sender_id, receiver_id),
    };
    let delivered = ctx
        .rooms
        .emit(&room, ServerEvent::ReceiveMessage(message.clone()), None)
        .await;
    debug!(%room, delivered, message_id = %message.id, "message broadcast to room");

    notify_receiver(ctx, command, &message).await;

    info!(
        chat_id = %conversation.id,
        message_id = %message.id,
        sender_id = %sender_id,
        receiver_id = %receiver_id,
        "message sent"
    );
    Ok(message)
}

async fn resolve_conversation(
    ctx: &ApiContext,
    sender_id: &UserId,
    receiver_id: &UserId,
    sender_model: ParticipantModel,
    receiver_model: ParticipantModel,
    first_message: &str,
) -> Result<Conversation, ChatError> {
    if let Some(existing) = ctx
        .storage
        .find_by_participants(sender_id, receiver_id)
        .await
        .map_err(ChatError::store)?
    {
        return Ok(existing);
    }

    let created = ctx
        .storage
        .create_conversation(&NewConversation {
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            sender_model,
            receiver_model,
            last_message: first_message.to_string(),
            last_message_at: Utc::now(),
        })
        .await
        .map_err(ChatError::store)?;
    debug!(chat_id = %created.id, %sender_id, %receiver_id, "conversation resolved");
    Ok(created)
}

/// Records a notification for the receiver and pushes it straight to their
/// connection when they are online. Failures are logged; the message itself
/// is already stored and delivered at this point.
async fn notify_receiver(ctx: &ApiContext, command: &SendMessageCommand, message: &Message) {
    let notification = match ctx
        .storage
        .create_notification(&NewNotification {
            from: command.sender_id.clone(),
            sender_model: command.sender_model,
            message: message.message_content.clone(),
            to: command.receiver_id.clone(),
            receiver_model: command.receiver_model,
        })
        .await
    {
        Ok(notification) => notification,
        Err(error) => {
            warn!(
                receiver_id = %command.receiver_id,
                message_id = %message.id,
                %error,
                "failed to persist notification"
            );
            return;
        }
    };

    let Some(receiver) = ctx.registry.get(&command.receiver_id).await else {
        debug!(receiver_id = %command.receiver_id, "receiver offline, notification kept for next registration");
        return;
    };

    let from = ctx
        .registry
        .get(&command.sender_id)
        .await
        .map(|record| record.display_name)
        .unwrap_or_else(|| command.sender_id.to_string());

    let pushed = receiver.handle.deliver(ServerEvent::Notification(NotificationPush {
        notification,
        from,
        message: message.message_content.clone(),
    }));
    if !pushed {
        warn!(receiver_id = %command.receiver_id, "notification push not accepted by connection");
    }
}

fn present(user_id: Option<&UserId>) -> Option<&UserId> {
    user_id.filter(|id| !id.as_str().trim().is_empty())
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    domain::{Message, Notification, ParticipantModel, UserId},
    error::{ApiError, ChatError, ProtocolError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Register,
    SendMessage,
    JoinRoom,
    Typing,
    StopTyping,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "register" => Some(Self::Register),
            "sendMessage" => Some(Self::SendMessage),
            "joinRoom" => Some(Self::JoinRoom),
            "typing" => Some(Self::Typing),
            "stop_typing" => Some(Self::StopTyping),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::SendMessage => "sendMessage",
            Self::JoinRoom => "joinRoom",
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCommand {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub sender_id: UserId,
    pub sender_model: ParticipantModel,
    pub receiver_id: UserId,
    pub receiver_model: ParticipantModel,
    pub room_id: Option<String>,
    /// Untrimmed as received; emptiness is judged by the orchestrator.
    pub raw_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register(RegisterCommand),
    SendMessage(SendMessageCommand),
    JoinRoom { room_id: String },
    Typing { room_id: Option<String>, payload: Value },
    StopTyping { room_id: Option<String>, payload: Value },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Register(_) => EventKind::Register,
            Self::SendMessage(_) => EventKind::SendMessage,
            Self::JoinRoom { .. } => EventKind::JoinRoom,
            Self::Typing { .. } => EventKind::Typing,
            Self::StopTyping { .. } => EventKind::StopTyping,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub ack: Option<u64>,
    pub event: ClientEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<Rejection> for ApiError {
    fn from(value: Rejection) -> Self {
        match value {
            Rejection::Chat(err) => err.into(),
            Rejection::Protocol(err) => err.into(),
        }
    }
}

/// A frame that failed validation. `kind` and `ack` are kept when they could be
/// read so the failure can still be answered on the request's response channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct RejectedFrame {
    pub kind: Option<EventKind>,
    pub ack: Option<u64>,
    pub reason: Rejection,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    ack: Option<u64>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegister {
    #[serde(default)]
    user_id: Value,
    #[serde(default)]
    name: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutgoing {
    #[serde(default)]
    message_content: Value,
    #[serde(default)]
    sender_id: Value,
    #[serde(default)]
    sender_model: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSendMessage {
    #[serde(default)]
    send_message: Option<RawOutgoing>,
    #[serde(default)]
    room_id: Value,
    #[serde(default)]
    receiver_id: Value,
    #[serde(default)]
    receiver_model: Value,
}

/// Parses one inbound text frame and validates its payload into a typed event.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, RejectedFrame> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|err| RejectedFrame {
        kind: None,
        ack: None,
        reason: ProtocolError::Malformed(err.to_string()).into(),
    })?;

    let reject = |kind: Option<EventKind>, reason: Rejection| RejectedFrame {
        kind,
        ack: raw.ack,
        reason,
    };

    let kind = EventKind::from_name(&raw.event)
        .ok_or_else(|| reject(None, ProtocolError::UnknownEvent(raw.event.clone()).into()))?;

    let event = match kind {
        EventKind::Register => decode_register(raw.data.clone()),
        EventKind::SendMessage => decode_send_message(raw.data.clone()),
        EventKind::JoinRoom => decode_join_room(&raw.data),
        EventKind::Typing => Ok(ClientEvent::Typing {
            room_id: room_of(&raw.data),
            payload: raw.data.clone(),
        }),
        EventKind::StopTyping => Ok(ClientEvent::StopTyping {
            room_id: room_of(&raw.data),
            payload: raw.data.clone(),
        }),
    }
    .map_err(|reason| reject(Some(kind), reason))?;

    Ok(ClientFrame {
        ack: raw.ack,
        event,
    })
}

fn decode_register(data: Value) -> Result<ClientEvent, Rejection> {
    let raw: RawRegister = from_payload(data, EventKind::Register)?;
    let user_id = normalize_text(&raw.user_id).ok_or(ChatError::InvalidRegistration)?;
    let name = normalize_text(&raw.name).ok_or(ChatError::InvalidRegistration)?;
    Ok(ClientEvent::Register(RegisterCommand {
        user_id: UserId(user_id),
        name,
    }))
}

fn decode_send_message(data: Value) -> Result<ClientEvent, Rejection> {
    let raw: RawSendMessage = from_payload(data, EventKind::SendMessage)?;
    let outgoing = raw.send_message.ok_or(ProtocolError::MissingField {
        event: "sendMessage",
        field: "sendMessage",
    })?;

    let raw_content = match &outgoing.message_content {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    };
    if raw_content.trim().is_empty() {
        return Err(ChatError::EmptyMessage.into());
    }

    let sender_id = normalize_text(&outgoing.sender_id).ok_or(ChatError::MissingSender)?;
    let receiver_id = normalize_text(&raw.receiver_id).ok_or(ChatError::MissingReceiver)?;
    let sender_model = participant_model(&outgoing.sender_model, "senderModel")?;
    let receiver_model = participant_model(&raw.receiver_model, "receiverModel")?;

    Ok(ClientEvent::SendMessage(SendMessageCommand {
        sender_id: UserId(sender_id),
        sender_model,
        receiver_id: UserId(receiver_id),
        receiver_model,
        room_id: normalize_text(&raw.room_id),
        raw_content,
    }))
}

fn decode_join_room(data: &Value) -> Result<ClientEvent, Rejection> {
    let room_id = room_of(data).ok_or(ChatError::MissingRoom)?;
    Ok(ClientEvent::JoinRoom { room_id })
}

fn from_payload<T: for<'de> Deserialize<'de> + Default>(
    data: Value,
    kind: EventKind,
) -> Result<T, Rejection> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|err| {
        ProtocolError::Malformed(format!("{} payload: {err}", kind.name())).into()
    })
}

fn participant_model(value: &Value, field: &'static str) -> Result<ParticipantModel, Rejection> {
    let raw = value.as_str().ok_or(ProtocolError::MissingField {
        event: "sendMessage",
        field,
    })?;
    ParticipantModel::parse(raw).ok_or_else(|| {
        ProtocolError::InvalidField {
            event: "sendMessage",
            field,
        }
        .into()
    })
}

fn room_of(data: &Value) -> Option<String> {
    data.get("roomId").and_then(normalize_text)
}

/// Reads an identity-like field. Strings are trimmed, numbers are rendered
/// in decimal; anything else, or an empty result, counts as absent.
pub fn normalize_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPush {
    pub notification: Notification,
    pub from: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub payload: Value,
}

/// Response to a client request. `event` names the request; `id` echoes the
/// request's `ack` when the client supplied one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub event: String,
    pub response: Value,
}

impl AckFrame {
    pub fn new(kind: EventKind, id: Option<u64>, response: impl Serialize) -> Self {
        Self {
            id,
            event: kind.name().to_string(),
            response: serde_json::to_value(response).unwrap_or(Value::Null),
        }
    }
}

/// Server-initiated frames, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),
    #[serde(rename = "notification")]
    Notification(NotificationPush),
    #[serde(rename = "display")]
    Display(TypingIndicator),
    #[serde(rename = "ack")]
    Ack(AckFrame),
    #[serde(rename = "error")]
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterResponse {
    Pending(Vec<Notification>),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendMessageResponse {
    Sent(Message),
    Failed { error: bool, message: String },
}

impl SendMessageResponse {
    pub fn failed(err: &ChatError) -> Self {
        Self::Failed {
            error: true,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;

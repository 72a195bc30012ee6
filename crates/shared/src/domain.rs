use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(MessageId);
id_newtype!(NotificationId);

/// Identity of a participant as announced by the client. Clients and vendors
/// live in separate identity namespaces, see [`ParticipantModel`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantModel {
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "vendors")]
    Vendor,
}

impl ParticipantModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Vendor => "vendors",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "client" => Some(Self::Client),
            "vendors" | "vendor" => Some(Self::Vendor),
            _ => None,
        }
    }
}

impl fmt::Display for ParticipantModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a delivery room.
///
/// Conversation rooms are the concatenation of both participant ids. The
/// canonical form always puts the lexicographically smaller id first so that
/// both participants land in the same room regardless of who derived it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn for_participants(a: &UserId, b: &UserId) -> Self {
        let (low, high) = ordered_pair(a, b);
        Self(format!("{}{}", low.0, high.0))
    }

    /// Canonicalizes `raw` when it is the concatenation of `a` and `b` in
    /// either order; any other room name is kept verbatim.
    pub fn canonicalize(raw: &str, a: &UserId, b: &UserId) -> Self {
        let forward = format!("{}{}", a.0, b.0);
        let backward = format!("{}{}", b.0, a.0);
        if raw == forward || raw == backward {
            Self::for_participants(a, b)
        } else {
            Self(raw.to_string())
        }
    }

    /// Rooms a `member` announcing `raw` may be addressed through.
    ///
    /// The peer id is whatever remains once the member's own id is stripped
    /// off the front or the back. When one id is a prefix of the other both
    /// readings can be valid, so every distinct canonical room is returned.
    /// A name that does not contain the member's id is kept verbatim.
    pub fn candidates_for_member(raw: &str, member: &UserId) -> Vec<Self> {
        let mut rooms: Vec<Self> = Vec::with_capacity(2);
        let peers = [
            raw.strip_prefix(member.as_str()),
            raw.strip_suffix(member.as_str()),
        ];
        for peer in peers.into_iter().flatten().filter(|peer| !peer.is_empty()) {
            let room = Self::canonicalize(raw, member, &UserId::from(peer));
            if !rooms.contains(&room) {
                rooms.push(room);
            }
        }
        if rooms.is_empty() {
            rooms.push(Self(raw.to_string()));
        }
        rooms
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn ordered_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_model: ParticipantModel,
    pub receiver_model: ParticipantModel,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_model: ParticipantModel,
    pub message_content: String,
    pub seen: bool,
    pub sended_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub from: UserId,
    pub sender_model: ParticipantModel,
    pub message: String,
    pub to: UserId,
    pub receiver_model: ParticipantModel,
    pub read: bool,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_model: ParticipantModel,
    pub receiver_model: ParticipantModel,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_model: ParticipantModel,
    pub message_content: String,
    pub sended_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub from: UserId,
    pub sender_model: ParticipantModel,
    pub message: String,
    pub to: UserId,
    pub receiver_model: ParticipantModel,
}

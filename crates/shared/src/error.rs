use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    Protocol,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failures of the presence, routing and chat operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("registration requires a non-empty userId and name")]
    InvalidRegistration,
    #[error("message content cannot be empty")]
    EmptyMessage,
    #[error("cannot open a chat with yourself")]
    SelfChat,
    #[error("sender id is required")]
    MissingSender,
    #[error("receiver id is required")]
    MissingReceiver,
    #[error("room id is required")]
    MissingRoom,
    #[error("update conversation failed: conversation not found")]
    ConversationNotFound,
    #[error("external store unavailable: {0}")]
    ExternalStoreUnavailable(String),
}

impl ChatError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::ExternalStoreUnavailable(err.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRegistration
            | Self::EmptyMessage
            | Self::SelfChat
            | Self::MissingSender
            | Self::MissingReceiver
            | Self::MissingRoom => ErrorCode::Validation,
            Self::ConversationNotFound => ErrorCode::NotFound,
            Self::ExternalStoreUnavailable(_) => ErrorCode::Unavailable,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.code() == ErrorCode::Validation
    }
}

impl From<ChatError> for ApiError {
    fn from(value: ChatError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}

/// A frame that could not be turned into a typed client event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("event '{event}' is missing required field '{field}'")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
    #[error("event '{event}' has an invalid '{field}'")]
    InvalidField {
        event: &'static str,
        field: &'static str,
    },
}

impl From<ProtocolError> for ApiError {
    fn from(value: ProtocolError) -> Self {
        Self::new(ErrorCode::Protocol, value.to_string())
    }
}

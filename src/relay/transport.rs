//! Outbound messaging primitives the relay depends on.
//!
//! The dispatch engine and command handlers only talk to [`Transport`];
//! [`crate::relay::TelegramClient`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::{ApiError, RequestError};
use thiserror::Error;

use crate::relay::store::WatchedChat;

/// Whether retrying a failed call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The recipient is gone for good: blocked the bot, deactivated, chat
    /// deleted, bot kicked.
    Permanent,
    /// The request itself was refused (`Bad Request`, e.g. the message to
    /// forward is gone). Retrying gives the same answer; the recipient is fine.
    Rejected,
    /// Network trouble, rate limits, server errors, anything unclassified.
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-provided wait before retrying (rate limiting).
    pub retry_after: Option<Duration>,
}

impl TransportError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Permanent, message: message.into(), retry_after: None }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transient, message: message.into(), retry_after: None }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Rejected, message: message.into(), retry_after: None }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Telegram error texts that mean the recipient cannot be reached again.
const UNREACHABLE_ERRORS: [&str; 6] = [
    "Forbidden:",
    "Bad Request: chat not found",
    "Bad Request: CHAT_WRITE_FORBIDDEN",
    "Bad Request: have no rights to send a message",
    "Bad Request: user not found",
    "Bad Request: PEER_ID_INVALID",
];

fn unreachable_text(text: &str) -> bool {
    UNREACHABLE_ERRORS.iter().any(|pattern| text.contains(pattern))
}

impl From<RequestError> for TransportError {
    fn from(error: RequestError) -> Self {
        let message = error.to_string();
        match &error {
            RequestError::Api(api) => {
                let permanent = matches!(
                    api,
                    ApiError::BotBlocked
                        | ApiError::UserDeactivated
                        | ApiError::ChatNotFound
                        | ApiError::BotKicked
                        | ApiError::BotKickedFromSupergroup
                        | ApiError::CantInitiateConversation
                ) || unreachable_text(&message);
                if permanent {
                    Self::permanent(message)
                } else if message.contains("Bad Request:") {
                    Self::rejected(message)
                } else {
                    Self::transient(message)
                }
            }
            RequestError::MigrateToChatId(_) => Self::permanent(message),
            RequestError::RetryAfter(seconds) => Self {
                retry_after: Some(seconds.duration()),
                ..Self::transient(message)
            },
            _ => Self::transient(message),
        }
    }
}

/// A chat reference typed by a user: numeric id or public handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    Id(i64),
    /// Handle without the leading `@`.
    Handle(String),
}

impl ChatRef {
    /// `-100123` → `Id`, `@name`/`name` → `Handle`. `None` for blank input.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Ok(id) = input.parse::<i64>() {
            return Some(ChatRef::Id(id));
        }
        let handle = input.trim_start_matches('@');
        if handle.is_empty() || handle.contains(char::is_whitespace) {
            return None;
        }
        Some(ChatRef::Handle(handle.to_string()))
    }
}

/// Outbound operations on the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;

    /// Forward a message, keeping its original author.
    async fn forward(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Cheap call that fails if `chat_id` cannot receive messages from the bot.
    async fn probe(&self, chat_id: i64) -> Result<(), TransportError>;

    /// Chat metadata, also used to check the bot still has access.
    async fn lookup_chat(&self, chat: &ChatRef) -> Result<WatchedChat, TransportError>;

    async fn leave_chat(&self, chat_id: i64) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::Seconds;

    #[test]
    fn test_bot_blocked_is_permanent() {
        let err = TransportError::from(RequestError::Api(ApiError::BotBlocked));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_user_deactivated_is_permanent() {
        let err = TransportError::from(RequestError::Api(ApiError::UserDeactivated));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_unknown_forbidden_is_permanent() {
        let err = TransportError::from(RequestError::Api(ApiError::Unknown(
            "Forbidden: bot was kicked from the channel chat".to_string(),
        )));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_bad_request_is_rejected() {
        let err = TransportError::from(RequestError::Api(ApiError::Unknown(
            "Bad Request: message to forward not found".to_string(),
        )));
        assert_eq!(err.kind, ErrorKind::Rejected);
        assert!(!err.is_retryable());
        assert!(!err.is_permanent());

        let err = TransportError::from(RequestError::Api(ApiError::MessageToForwardNotFound));
        assert_eq!(err.kind, ErrorKind::Rejected);
    }

    #[test]
    fn test_other_api_errors_are_transient() {
        let err = TransportError::from(RequestError::Api(ApiError::Unknown(
            "Internal Server Error: restart".to_string(),
        )));
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retry_after_carries_hint() {
        let err = TransportError::from(RequestError::RetryAfter(Seconds::from_seconds(7)));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_chat_ref_parse() {
        assert_eq!(ChatRef::parse("-100123"), Some(ChatRef::Id(-100123)));
        assert_eq!(ChatRef::parse(" @ofertas "), Some(ChatRef::Handle("ofertas".into())));
        assert_eq!(ChatRef::parse("ofertas"), Some(ChatRef::Handle("ofertas".into())));
        assert_eq!(ChatRef::parse("@"), None);
        assert_eq!(ChatRef::parse(""), None);
        assert_eq!(ChatRef::parse("two words"), None);
    }
}

//! Telegram transport using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{Chat, ChatAction, MessageId, Recipient};
use tracing::{debug, info, warn};

use crate::relay::message::{ChatKind, IncomingMessage, SourceChat};
use crate::relay::store::WatchedChat;
use crate::relay::transport::{ChatRef, Transport, TransportError};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Title for groups/channels, full name for private chats.
fn chat_title(title: Option<&str>, first_name: Option<&str>, last_name: Option<&str>) -> Option<String> {
    if let Some(title) = title {
        return Some(title.to_string());
    }
    let name = [first_name, last_name]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { None } else { Some(name) }
}

fn chat_kind(chat: &Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Group
    }
}

/// Transport-neutral view of a teloxide chat.
pub fn source_chat(chat: &Chat) -> SourceChat {
    SourceChat {
        id: chat.id.0,
        kind: chat_kind(chat),
        title: chat_title(chat.title(), chat.first_name(), chat.last_name()),
        username: chat.username().map(str::to_string),
    }
}

/// Transport-neutral view of a teloxide message.
pub fn incoming_message(msg: &Message) -> IncomingMessage {
    let author = msg
        .from
        .as_ref()
        .map(|user| user.full_name())
        .or_else(|| msg.sender_chat.as_ref().and_then(|c| c.title().map(str::to_string)));

    IncomingMessage {
        message_id: msg.id.0,
        author,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("Failed to send message to {}: {e}", chat_id);
                TransportError::from(e)
            })
    }

    async fn forward(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        debug!("Forwarding msg {} from {} to {}", message_id, from_chat_id, to_chat_id);
        self.bot
            .forward_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("Failed to forward msg {} to {}: {e}", message_id, to_chat_id);
                TransportError::from(e)
            })
    }

    async fn probe(&self, chat_id: i64) -> Result<(), TransportError> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(TransportError::from)
    }

    async fn lookup_chat(&self, chat: &ChatRef) -> Result<WatchedChat, TransportError> {
        let recipient = match chat {
            ChatRef::Id(id) => Recipient::Id(ChatId(*id)),
            ChatRef::Handle(handle) => Recipient::ChannelUsername(format!("@{handle}")),
        };

        let info = self.bot.get_chat(recipient).await.map_err(TransportError::from)?;

        Ok(WatchedChat {
            id: info.id.0,
            title: chat_title(info.title(), info.first_name(), info.last_name()).unwrap_or_default(),
            username: info.username().map(str::to_string),
        })
    }

    async fn leave_chat(&self, chat_id: i64) -> Result<(), TransportError> {
        info!("🚪 Leaving chat {}", chat_id);
        self.bot
            .leave_chat(ChatId(chat_id))
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("Failed to leave chat {}: {e}", chat_id);
                TransportError::from(e)
            })
    }
}

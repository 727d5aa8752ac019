//! Keyword relay bot: watches Telegram chats and forwards messages that match
//! a subscriber's keywords to that subscriber's private chat.

pub mod config;
pub mod relay;
pub mod webhook;

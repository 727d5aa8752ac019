//! Relay module - matches watched-chat messages against subscriber keywords.

pub mod commands;
pub mod dispatch;
pub mod matcher;
pub mod message;
pub mod normalize;
pub mod store;
pub mod telegram;
pub mod transport;


pub use commands::{Command, CommandContext, CommandHandler, LeaveOutcome};
pub use dispatch::{DeliveryPolicy, DispatchEngine, DispatchReport};
pub use matcher::{matches, NormalizedText};
pub use message::{ChatKind, IncomingMessage, SourceChat};
pub use normalize::normalize;
pub use store::{copy_store, open_store, resolve_chat, CopySummary, JsonStore, SqliteStore, StorageKind, StoreError, Subscriber, SubscriptionStore, WatchedChat};
pub use telegram::TelegramClient;
pub use transport::{ChatRef, ErrorKind, Transport, TransportError};

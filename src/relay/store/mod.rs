//! Subscriber and watched-chat persistence.
//!
//! The [`SubscriptionStore`] trait is what the dispatch engine and the command
//! handlers see. Two backends implement it:
//! - [`JsonStore`]: one JSON document, rewritten atomically on every change.
//! - [`SqliteStore`]: `users`, `keywords` and `watched_chats` tables.
//!
//! Every mutation is serialized by the backend. Reads return owned snapshots.

mod json;
mod sqlite;

pub use json::JsonStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A user who can receive forwarded messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub subscribed: bool,
    /// Keyword phrases in insertion order, no exact duplicates.
    pub keywords: Vec<String>,
}

impl Subscriber {
    pub fn new(id: i64) -> Self {
        Self { id, subscribed: false, keywords: Vec::new() }
    }

    /// Subscribed and has at least one keyword.
    pub fn is_active(&self) -> bool {
        self.subscribed && !self.keywords.is_empty()
    }
}

/// A chat the bot scans for keyword matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedChat {
    pub id: i64,
    pub title: String,
    /// Public handle without the leading `@`.
    pub username: Option<String>,
}

impl WatchedChat {
    /// `t.me/<handle>` for public chats, `id:<id>` otherwise.
    pub fn link(&self) -> String {
        match &self.username {
            Some(username) => format!("t.me/{username}"),
            None => format!("id:{}", self.id),
        }
    }
}

/// Result of adding a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddKeyword {
    Added,
    AlreadyExists,
}

/// Result of removing a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveKeyword {
    Removed { remaining: Vec<String> },
    NotFound,
}

/// Which backend holds the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Json,
    Sqlite,
}

impl StorageKind {
    /// File name of the store inside the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            StorageKind::Json => "db.json",
            StorageKind::Sqlite => "bot.db",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store file '{}': {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write store file '{}': {source}", .path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("failed to parse store file '{}': {source}", .path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// CRUD over subscribers and watched chats.
///
/// Subscriber records are created on first use by `set_subscribed` and
/// `add_keyword`; they are never deleted.
pub trait SubscriptionStore: Send + Sync {
    fn subscriber(&self, user_id: i64) -> Result<Option<Subscriber>, StoreError>;

    fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError>;

    /// Subscribers that should be considered for dispatch.
    fn active_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .subscribers()?
            .into_iter()
            .filter(Subscriber::is_active)
            .collect())
    }

    fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), StoreError>;

    /// Keywords are stored trimmed; an exact duplicate is reported, not added.
    fn add_keyword(&self, user_id: i64, keyword: &str) -> Result<AddKeyword, StoreError>;

    fn remove_keyword(&self, user_id: i64, keyword: &str) -> Result<RemoveKeyword, StoreError>;

    fn clear_keywords(&self, user_id: i64) -> Result<(), StoreError>;

    fn keywords(&self, user_id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .subscriber(user_id)?
            .map(|s| s.keywords)
            .unwrap_or_default())
    }

    /// Insert or replace by chat id.
    fn watch_chat(&self, chat: WatchedChat) -> Result<(), StoreError>;

    /// Returns the removed chat, if it was watched.
    fn unwatch_chat(&self, chat_id: i64) -> Result<Option<WatchedChat>, StoreError>;

    /// Remove every watched chat, returning what was removed.
    fn unwatch_all(&self) -> Result<Vec<WatchedChat>, StoreError>;

    fn watched_chats(&self) -> Result<Vec<WatchedChat>, StoreError>;

    fn is_watched(&self, chat_id: i64) -> Result<bool, StoreError> {
        Ok(self.watched_chats()?.iter().any(|c| c.id == chat_id))
    }
}

/// Open the configured backend inside `data_dir`.
pub fn open_store(kind: StorageKind, data_dir: &Path) -> Result<Arc<dyn SubscriptionStore>, StoreError> {
    let path = data_dir.join(kind.file_name());
    let store: Arc<dyn SubscriptionStore> = match kind {
        StorageKind::Json => Arc::new(JsonStore::open(&path)?),
        StorageKind::Sqlite => Arc::new(SqliteStore::open(&path)?),
    };
    Ok(store)
}

/// Find a watched chat from a user-supplied identifier.
///
/// Strategies are tried in order over the whole list, first hit wins:
/// 1. exact numeric id
/// 2. exact public handle (leading `@` optional, case-insensitive)
/// 3. case-insensitive substring of the title
pub fn resolve_chat<'a>(chats: &'a [WatchedChat], query: &str) -> Option<&'a WatchedChat> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    if let Ok(id) = query.parse::<i64>()
        && let Some(chat) = chats.iter().find(|c| c.id == id)
    {
        return Some(chat);
    }

    let handle = query.trim_start_matches('@');
    if !handle.is_empty()
        && let Some(chat) = chats.iter().find(|c| {
            c.username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(handle))
        })
    {
        return Some(chat);
    }

    let needle = query.to_lowercase();
    chats
        .iter()
        .find(|c| c.title.to_lowercase().contains(&needle))
}

/// Counts from [`copy_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub subscribers: usize,
    pub keywords: usize,
    pub watched_chats: usize,
}

/// Copy every subscriber and watched chat from `from` into `to`.
///
/// Existing records in `to` are kept; keywords already present are skipped.
pub fn copy_store(from: &dyn SubscriptionStore, to: &dyn SubscriptionStore) -> Result<CopySummary, StoreError> {
    let mut summary = CopySummary::default();

    for subscriber in from.subscribers()? {
        for keyword in &subscriber.keywords {
            if to.add_keyword(subscriber.id, keyword)? == AddKeyword::Added {
                summary.keywords += 1;
            }
        }
        to.set_subscribed(subscriber.id, subscriber.subscribed)?;
        summary.subscribers += 1;
    }

    for chat in from.watched_chats()? {
        to.watch_chat(chat)?;
        summary.watched_chats += 1;
    }

    Ok(summary)
}

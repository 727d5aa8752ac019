//! JSON document store.
//!
//! Layout on disk:
//!
//! ```json
//! {
//!   "users": { "123": { "subscribed": true, "keywords": ["teclado"] } },
//!   "watched_chats": { "-100": { "id": -100, "title": "Ofertas", "username": "ofertas" } }
//! }
//! ```
//!
//! Each change is written to `<file>.tmp` and renamed over the real file, so a
//! failed write never leaves a truncated document behind. Older deployments
//! also kept a `.txt` mirror of the same document; it is read when the main
//! file is missing.

use super::{AddKeyword, RemoveKeyword, StoreError, Subscriber, SubscriptionStore, WatchedChat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct UserRecord {
    #[serde(default)]
    subscribed: bool,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatRecord {
    id: i64,
    #[serde(default)]
    title: String,
    /// Empty string when the chat has no public handle.
    #[serde(default)]
    username: String,
}

impl From<&ChatRecord> for WatchedChat {
    fn from(record: &ChatRecord) -> Self {
        WatchedChat {
            id: record.id,
            title: record.title.clone(),
            username: Some(record.username.clone()).filter(|u| !u.is_empty()),
        }
    }
}

impl From<WatchedChat> for ChatRecord {
    fn from(chat: WatchedChat) -> Self {
        ChatRecord {
            id: chat.id,
            title: chat.title,
            username: chat.username.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    users: BTreeMap<i64, UserRecord>,
    #[serde(default)]
    watched_chats: BTreeMap<i64, ChatRecord>,
}

impl Document {
    fn user_mut(&mut self, user_id: i64) -> &mut UserRecord {
        self.users.entry(user_id).or_default()
    }

    fn subscriber(&self, user_id: i64) -> Option<Subscriber> {
        self.users.get(&user_id).map(|u| Subscriber {
            id: user_id,
            subscribed: u.subscribed,
            keywords: u.keywords.clone(),
        })
    }
}

/// Subscription store backed by a single JSON file.
pub struct JsonStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonStore {
    /// Load the document at `path`, falling back to its `.txt` mirror, or
    /// start empty when neither exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let legacy = path.with_extension("txt");
        let doc = if path.exists() {
            read_document(path)?
        } else if legacy.exists() {
            match read_document(&legacy) {
                Ok(doc) => {
                    info!("Loaded store from legacy mirror {:?}", legacy);
                    doc
                }
                Err(e) => {
                    warn!("Ignoring unreadable legacy store: {e}");
                    Document::default()
                }
            }
        } else {
            info!("No store file at {:?}, starting fresh", path);
            Document::default()
        };

        info!(
            "Loaded JSON store from {:?} ({} users, {} watched chats)",
            path,
            doc.users.len(),
            doc.watched_chats.len()
        );

        Ok(Self { path: path.to_path_buf(), doc: Mutex::new(doc) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> Result<T, StoreError> {
        let doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&doc))
    }

    /// Apply `f` to a copy of the document, persist the copy if it changed,
    /// and only then make it the in-memory state.
    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> T) -> Result<T, StoreError> {
        let mut doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = doc.clone();
        let result = f(&mut next);
        if next != *doc {
            write_document(&self.path, &next)?;
            *doc = next;
        }
        Ok(result)
    }
}

fn read_document(path: &Path) -> Result<Document, StoreError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| StoreError::Read { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&json).map_err(|e| StoreError::Parse { path: path.to_path_buf(), source: e })
}

fn write_document(path: &Path, doc: &Document) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(doc).map_err(StoreError::Serialize)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let write_err = |e| StoreError::Write { path: path.to_path_buf(), source: e };
    {
        let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
    }
    std::fs::rename(&tmp, path).map_err(write_err)?;

    debug!("💾 Saved store ({} users, {} chats)", doc.users.len(), doc.watched_chats.len());
    Ok(())
}

impl SubscriptionStore for JsonStore {
    fn subscriber(&self, user_id: i64) -> Result<Option<Subscriber>, StoreError> {
        self.read(|doc| doc.subscriber(user_id))
    }

    fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        self.read(|doc| {
            doc.users
                .keys()
                .filter_map(|id| doc.subscriber(*id))
                .collect()
        })
    }

    fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), StoreError> {
        self.mutate(|doc| doc.user_mut(user_id).subscribed = subscribed)
    }

    fn add_keyword(&self, user_id: i64, keyword: &str) -> Result<AddKeyword, StoreError> {
        let keyword = keyword.trim();
        self.mutate(|doc| {
            let user = doc.user_mut(user_id);
            if user.keywords.iter().any(|k| k == keyword) {
                AddKeyword::AlreadyExists
            } else {
                user.keywords.push(keyword.to_string());
                AddKeyword::Added
            }
        })
    }

    fn remove_keyword(&self, user_id: i64, keyword: &str) -> Result<RemoveKeyword, StoreError> {
        let keyword = keyword.trim();
        self.mutate(|doc| {
            let Some(user) = doc.users.get_mut(&user_id) else {
                return RemoveKeyword::NotFound;
            };
            match user.keywords.iter().position(|k| k == keyword) {
                Some(idx) => {
                    user.keywords.remove(idx);
                    RemoveKeyword::Removed { remaining: user.keywords.clone() }
                }
                None => RemoveKeyword::NotFound,
            }
        })
    }

    fn clear_keywords(&self, user_id: i64) -> Result<(), StoreError> {
        self.mutate(|doc| doc.user_mut(user_id).keywords.clear())
    }

    fn watch_chat(&self, chat: WatchedChat) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.watched_chats.insert(chat.id, chat.into());
        })
    }

    fn unwatch_chat(&self, chat_id: i64) -> Result<Option<WatchedChat>, StoreError> {
        self.mutate(|doc| doc.watched_chats.remove(&chat_id).map(|r| WatchedChat::from(&r)))
    }

    fn unwatch_all(&self) -> Result<Vec<WatchedChat>, StoreError> {
        self.mutate(|doc| {
            std::mem::take(&mut doc.watched_chats)
                .values()
                .map(WatchedChat::from)
                .collect()
        })
    }

    fn watched_chats(&self) -> Result<Vec<WatchedChat>, StoreError> {
        self.read(|doc| doc.watched_chats.values().map(WatchedChat::from).collect())
    }

    fn is_watched(&self, chat_id: i64) -> Result<bool, StoreError> {
        self.read(|doc| doc.watched_chats.contains_key(&chat_id))
    }
}

//! SQLite subscription store.

use super::{AddKeyword, RemoveKeyword, StoreError, Subscriber, SubscriptionStore, WatchedChat};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Subscription store backed by an SQLite database.
///
/// Keyword order is the insertion order, kept by the autoincrement id.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        let (users, chats) = store.counts()?;
        info!("Loaded SQLite store from {:?} ({} users, {} watched chats)", path, users, chats);
        Ok(store)
    }

    /// In-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                subscribed INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                keyword TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watched_chats (
                chat_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                username TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_keywords_user_id ON keywords(user_id);
        "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn counts(&self) -> Result<(i64, i64), StoreError> {
        let conn = self.conn()?;
        let users = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let chats = conn.query_row("SELECT COUNT(*) FROM watched_chats", [], |row| row.get(0))?;
        Ok((users, chats))
    }
}

fn ensure_user(conn: &Connection, user_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users (user_id, subscribed) VALUES (?1, 0)",
        params![user_id],
    )?;
    Ok(())
}

fn keywords_of(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT keyword FROM keywords WHERE user_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    rows.collect()
}

fn chat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WatchedChat> {
    let username: Option<String> = row.get(2)?;
    Ok(WatchedChat {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        username: username.filter(|u| !u.is_empty()),
    })
}

fn all_chats(conn: &Connection) -> rusqlite::Result<Vec<WatchedChat>> {
    let mut stmt = conn.prepare("SELECT chat_id, title, username FROM watched_chats ORDER BY chat_id")?;
    let rows = stmt.query_map([], chat_from_row)?;
    rows.collect()
}

impl SubscriptionStore for SqliteStore {
    fn subscriber(&self, user_id: i64) -> Result<Option<Subscriber>, StoreError> {
        let conn = self.conn()?;
        let subscribed: Option<bool> = conn
            .query_row(
                "SELECT subscribed FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(subscribed) = subscribed else {
            return Ok(None);
        };
        Ok(Some(Subscriber { id: user_id, subscribed, keywords: keywords_of(&conn, user_id)? }))
    }

    fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let conn = self.conn()?;

        let mut users: BTreeMap<i64, Subscriber> = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT user_id, subscribed FROM users")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            users.insert(id, Subscriber { id, subscribed: row.get(1)?, keywords: Vec::new() });
        }

        let mut stmt = conn.prepare("SELECT user_id, keyword FROM keywords ORDER BY id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            if let Some(user) = users.get_mut(&id) {
                user.keywords.push(row.get(1)?);
            }
        }

        Ok(users.into_values().collect())
    }

    fn set_subscribed(&self, user_id: i64, subscribed: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, subscribed) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET subscribed = ?2",
            params![user_id, subscribed],
        )?;
        Ok(())
    }

    fn add_keyword(&self, user_id: i64, keyword: &str) -> Result<AddKeyword, StoreError> {
        let keyword = keyword.trim();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ensure_user(&tx, user_id)?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM keywords WHERE user_id = ?1 AND keyword = ?2",
                params![user_id, keyword],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            tx.commit()?;
            return Ok(AddKeyword::AlreadyExists);
        }
        tx.execute(
            "INSERT INTO keywords (user_id, keyword) VALUES (?1, ?2)",
            params![user_id, keyword],
        )?;
        tx.commit()?;
        Ok(AddKeyword::Added)
    }

    fn remove_keyword(&self, user_id: i64, keyword: &str) -> Result<RemoveKeyword, StoreError> {
        let keyword = keyword.trim();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM keywords WHERE user_id = ?1 AND keyword = ?2",
            params![user_id, keyword],
        )?;
        let outcome = if removed > 0 {
            RemoveKeyword::Removed { remaining: keywords_of(&tx, user_id)? }
        } else {
            RemoveKeyword::NotFound
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn clear_keywords(&self, user_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ensure_user(&tx, user_id)?;
        tx.execute("DELETE FROM keywords WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(())
    }

    fn keywords(&self, user_id: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        Ok(keywords_of(&conn, user_id)?)
    }

    fn watch_chat(&self, chat: WatchedChat) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO watched_chats (chat_id, title, username) VALUES (?1, ?2, ?3)",
            params![chat.id, chat.title, chat.username],
        )?;
        Ok(())
    }

    fn unwatch_chat(&self, chat_id: i64) -> Result<Option<WatchedChat>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let chat = tx
            .query_row(
                "SELECT chat_id, title, username FROM watched_chats WHERE chat_id = ?1",
                params![chat_id],
                chat_from_row,
            )
            .optional()?;
        tx.execute("DELETE FROM watched_chats WHERE chat_id = ?1", params![chat_id])?;
        tx.commit()?;
        Ok(chat)
    }

    fn unwatch_all(&self) -> Result<Vec<WatchedChat>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let chats = all_chats(&tx)?;
        tx.execute("DELETE FROM watched_chats", [])?;
        tx.commit()?;
        Ok(chats)
    }

    fn watched_chats(&self) -> Result<Vec<WatchedChat>, StoreError> {
        let conn = self.conn()?;
        Ok(all_chats(&conn)?)
    }

    fn is_watched(&self, chat_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM watched_chats WHERE chat_id = ?1",
                params![chat_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chat(id: i64, title: &str, username: Option<&str>) -> WatchedChat {
        WatchedChat { id, title: title.to_string(), username: username.map(str::to_string) }
    }

    #[test]
    fn test_keywords_ordered_and_unique() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.add_keyword(1, "zeta").unwrap(), AddKeyword::Added);
        assert_eq!(store.add_keyword(1, "alfa").unwrap(), AddKeyword::Added);
        assert_eq!(store.add_keyword(1, "zeta").unwrap(), AddKeyword::AlreadyExists);
        assert_eq!(store.keywords(1).unwrap(), vec!["zeta", "alfa"]);
    }

    #[test]
    fn test_subscription_flag() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.subscriber(3).unwrap().is_none());
        store.set_subscribed(3, true).unwrap();
        assert!(store.subscriber(3).unwrap().unwrap().subscribed);
        store.set_subscribed(3, false).unwrap();
        assert!(!store.subscriber(3).unwrap().unwrap().subscribed);
    }

    #[test]
    fn test_active_subscribers() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_subscribed(1, true).unwrap();
        store.add_keyword(1, "tv").unwrap();
        store.set_subscribed(2, true).unwrap();
        store.add_keyword(3, "tv").unwrap();

        let active = store.active_subscribers().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
        assert_eq!(active[0].keywords, vec!["tv"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_keyword(1, "a").unwrap();
        store.add_keyword(1, "b").unwrap();
        store.add_keyword(2, "a").unwrap();
        assert_eq!(
            store.remove_keyword(1, "a").unwrap(),
            RemoveKeyword::Removed { remaining: vec!["b".to_string()] }
        );
        assert_eq!(store.remove_keyword(1, "a").unwrap(), RemoveKeyword::NotFound);
        store.clear_keywords(1).unwrap();
        assert!(store.keywords(1).unwrap().is_empty());
        assert_eq!(store.keywords(2).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_watched_chats() {
        let store = SqliteStore::in_memory().unwrap();
        store.watch_chat(chat(-10, "Ofertas", Some("ofertas"))).unwrap();
        store.watch_chat(chat(-20, "Grupo", None)).unwrap();
        assert!(store.is_watched(-10).unwrap());
        assert!(!store.is_watched(-30).unwrap());

        assert_eq!(store.unwatch_chat(-10).unwrap(), Some(chat(-10, "Ofertas", Some("ofertas"))));
        assert_eq!(store.unwatch_chat(-10).unwrap(), None);
        assert_eq!(store.unwatch_all().unwrap(), vec![chat(-20, "Grupo", None)]);
        assert!(store.watched_chats().unwrap().is_empty());
    }

    #[test]
    fn test_reads_empty_username_as_none() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO watched_chats (chat_id, title, username) VALUES (-5, 'Velho', '')",
                [],
            )
            .unwrap();
        assert_eq!(store.watched_chats().unwrap(), vec![chat(-5, "Velho", None)]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_subscribed(9, true).unwrap();
            store.add_keyword(9, "geladeira frost free").unwrap();
            store.watch_chat(chat(-1, "Casa", None)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let sub = store.subscriber(9).unwrap().unwrap();
        assert!(sub.subscribed);
        assert_eq!(sub.keywords, vec!["geladeira frost free"]);
        assert!(store.is_watched(-1).unwrap());
    }
}

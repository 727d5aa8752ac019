//! Bot commands: parsing and execution.
//!
//! Commands run against the store and the transport and always produce a
//! reply text. Validation and not-found outcomes are replies, not errors;
//! only store failures are returned as `Err`.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use teloxide::types::BotCommand;
use tracing::{info, warn};

use crate::relay::matcher::keyword_tokens;
use crate::relay::message::SourceChat;
use crate::relay::store::{resolve_chat, AddKeyword, RemoveKeyword, StoreError, SubscriptionStore, WatchedChat};
use crate::relay::transport::{ChatRef, Transport};

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// `/notifyme`
    NotifyOn,
    /// `/removeme`
    NotifyOff,
    /// `/addp <phrase>`
    AddKeyword(String),
    /// `/delp <phrase>`
    RemoveKeyword(String),
    /// `/listp`
    ListKeywords,
    /// `/delpall`
    ClearKeywords,
    /// `/addgc [@handle|id]`
    RegisterChat(String),
    /// `/listgc`
    ListWatched,
    /// `/sairgc <id|@handle|title>`
    LeaveChat(String),
    /// `/sairgcall`
    LeaveAll,
}

/// Command names and menu descriptions, in menu order.
const COMMANDS: [(&str, &str); 12] = [
    ("start", "show the welcome message"),
    ("help", "list available commands"),
    ("notifyme", "start receiving notifications"),
    ("removeme", "stop receiving notifications"),
    ("addp", "add a keyword or phrase (all words must appear)"),
    ("delp", "remove a keyword or phrase"),
    ("listp", "list your keywords"),
    ("delpall", "remove all your keywords"),
    ("addgc", "watch this group/channel, or <@handle|id> in private"),
    ("listgc", "list watched groups/channels"),
    ("sairgc", "leave a group/channel: <id|@handle|title>"),
    ("sairgcall", "leave every watched group/channel"),
];

impl Command {
    /// Parse `/name[@bot] [args]`.
    ///
    /// Returns `None` for non-commands, unknown names, and commands addressed
    /// to a different bot.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim_start();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if let (Some(target), Some(me)) = (target, bot_username)
            && !target.eq_ignore_ascii_case(me)
        {
            return None;
        }

        let args = args.to_string();
        let command = match name.to_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "notifyme" => Command::NotifyOn,
            "removeme" => Command::NotifyOff,
            "addp" => Command::AddKeyword(args),
            "delp" => Command::RemoveKeyword(args),
            "listp" => Command::ListKeywords,
            "delpall" => Command::ClearKeywords,
            "addgc" => Command::RegisterChat(args),
            "listgc" => Command::ListWatched,
            "sairgc" => Command::LeaveChat(args),
            "sairgcall" => Command::LeaveAll,
            _ => return None,
        };
        Some(command)
    }

    /// Entries for the Telegram command menu.
    pub fn menu() -> Vec<BotCommand> {
        COMMANDS
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect()
    }

    /// Watched-chat management, restricted to admins when admins are configured.
    fn is_admin_only(&self) -> bool {
        matches!(self, Command::RegisterChat(_) | Command::LeaveChat(_) | Command::LeaveAll)
    }
}

/// Help text listing every command.
pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for (name, description) in COMMANDS {
        let _ = writeln!(text, "/{name} - {description}");
    }
    text
}

/// Where a command was issued and by whom.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// `None` for channel posts, which have no sending user.
    pub user_id: Option<i64>,
    pub chat: SourceChat,
}

/// Outcome of leaving one chat: the store step and the transport step are
/// reported separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub chat: WatchedChat,
    /// `Err` carries the transport error text.
    pub left: Result<(), String>,
}

pub struct CommandHandler {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn Transport>,
    admin_ids: HashSet<i64>,
}

impl CommandHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, transport: Arc<dyn Transport>, admin_ids: HashSet<i64>) -> Self {
        Self { store, transport, admin_ids }
    }

    fn is_allowed(&self, command: &Command, ctx: &CommandContext) -> bool {
        if self.admin_ids.is_empty() || !command.is_admin_only() {
            return true;
        }
        ctx.user_id.is_some_and(|id| self.admin_ids.contains(&id))
    }

    /// Run `command` and build the reply.
    pub async fn execute(&self, command: Command, ctx: &CommandContext) -> Result<String, StoreError> {
        if !self.is_allowed(&command, ctx) {
            info!("Denied {:?} for user {:?}", command, ctx.user_id);
            return Ok("Only bot admins can manage watched groups/channels.".to_string());
        }

        match command {
            Command::Start => Ok("Hi! I forward offers that match your keywords. Use /help to see the commands.".to_string()),
            Command::Help => Ok(help_text()),
            Command::RegisterChat(arg) => self.register_chat(ctx, &arg).await,
            Command::ListWatched => self.list_watched().await,
            Command::LeaveChat(arg) => self.leave_chat(&arg).await,
            Command::LeaveAll => self.leave_all().await,
            user_command => {
                let Some(user_id) = ctx.user_id else {
                    return Ok("This command must be sent by a user.".to_string());
                };
                self.execute_for_user(user_command, user_id)
            }
        }
    }

    fn execute_for_user(&self, command: Command, user_id: i64) -> Result<String, StoreError> {
        match command {
            Command::NotifyOn => {
                self.store.set_subscribed(user_id, true)?;
                info!("🔔 User {} subscribed", user_id);
                Ok("You are subscribed. Matches will be sent to you in a private chat.".to_string())
            }
            Command::NotifyOff => {
                self.store.set_subscribed(user_id, false)?;
                info!("🔕 User {} unsubscribed", user_id);
                Ok("You will no longer receive notifications.".to_string())
            }
            Command::AddKeyword(phrase) => {
                if keyword_tokens(&phrase).is_empty() {
                    return Ok("Usage: /addp <word or phrase>\nExample: /addp Teclado Magnético".to_string());
                }
                match self.store.add_keyword(user_id, &phrase)? {
                    AddKeyword::Added => Ok(format!("Keyword added: {phrase}")),
                    AddKeyword::AlreadyExists => Ok(format!("Keyword already exists: {phrase}")),
                }
            }
            Command::RemoveKeyword(phrase) => {
                if phrase.is_empty() {
                    return Ok("Usage: /delp <word or phrase>".to_string());
                }
                match self.store.remove_keyword(user_id, &phrase)? {
                    RemoveKeyword::Removed { remaining } if remaining.is_empty() => {
                        Ok("Keyword removed. You have no keywords left.".to_string())
                    }
                    RemoveKeyword::Removed { remaining } => Ok(keyword_list(&remaining)),
                    RemoveKeyword::NotFound => Ok("Keyword not found in your list.".to_string()),
                }
            }
            Command::ListKeywords => {
                let keywords = self.store.keywords(user_id)?;
                if keywords.is_empty() {
                    Ok("You have no keywords yet.".to_string())
                } else {
                    Ok(keyword_list(&keywords))
                }
            }
            Command::ClearKeywords => {
                self.store.clear_keywords(user_id)?;
                Ok("All your keywords were removed.".to_string())
            }
            other => {
                warn!("Unexpected user command {:?}", other);
                Ok(help_text())
            }
        }
    }

    async fn register_chat(&self, ctx: &CommandContext, arg: &str) -> Result<String, StoreError> {
        if ctx.chat.kind.is_watchable() {
            self.store.watch_chat(ctx.chat.to_watched())?;
            info!("👀 Watching chat {} ({})", ctx.chat.display_title(), ctx.chat.id);
            return Ok("Group/channel registered for monitoring ✅".to_string());
        }

        let Some(chat_ref) = ChatRef::parse(arg) else {
            return Ok("In a private chat, send /addgc <@handle or chat_id>".to_string());
        };
        match self.transport.lookup_chat(&chat_ref).await {
            Ok(chat) => {
                let reply = format!("Added: {} (id={})", chat.title, chat.id);
                info!("👀 Watching chat {} ({})", chat.title, chat.id);
                self.store.watch_chat(chat)?;
                Ok(reply)
            }
            Err(e) => {
                warn!("Lookup of {:?} failed: {e}", chat_ref);
                Ok(format!("Could not add chat: {e}"))
            }
        }
    }

    async fn list_watched(&self) -> Result<String, StoreError> {
        let chats = self.store.watched_chats()?;
        if chats.is_empty() {
            return Ok("No groups/channels are being watched.".to_string());
        }

        let mut reply = String::from("Watched groups/channels:");
        for chat in &chats {
            let status = match self.transport.lookup_chat(&ChatRef::Id(chat.id)).await {
                Ok(_) => "ok",
                Err(_) => "bot probably removed or chat unreachable",
            };
            let _ = write!(reply, "\n- {} ({}) -> {}", chat.title, chat.link(), status);
        }
        Ok(reply)
    }

    async fn leave_chat(&self, arg: &str) -> Result<String, StoreError> {
        if arg.is_empty() {
            return Ok("Usage: /sairgc <id | @handle | title>".to_string());
        }
        let chats = self.store.watched_chats()?;
        let Some(chat) = resolve_chat(&chats, arg).cloned() else {
            return Ok("Group/channel not found in the watched list.".to_string());
        };

        self.store.unwatch_chat(chat.id)?;
        let outcome = self.leave(chat).await;
        Ok(match outcome.left {
            Ok(()) => format!("Left {} and stopped monitoring it.", outcome.chat.title),
            Err(e) => format!("Stopped monitoring {}, but leaving the chat failed: {e}", outcome.chat.title),
        })
    }

    async fn leave_all(&self) -> Result<String, StoreError> {
        let chats = self.store.unwatch_all()?;
        if chats.is_empty() {
            return Ok("No groups/channels to leave.".to_string());
        }

        let total = chats.len();
        let mut failed = Vec::new();
        for chat in chats {
            let outcome = self.leave(chat).await;
            if outcome.left.is_err() {
                failed.push(outcome.chat.title);
            }
        }

        if failed.is_empty() {
            Ok(format!("Left all {total} groups/channels and cleared the list."))
        } else {
            Ok(format!(
                "Cleared the list of {total} groups/channels. Could not leave {}: {}",
                failed.len(),
                failed.join(", ")
            ))
        }
    }

    async fn leave(&self, chat: WatchedChat) -> LeaveOutcome {
        let left = self.transport.leave_chat(chat.id).await.map_err(|e| e.to_string());
        LeaveOutcome { chat, left }
    }
}

/// Numbered list, 1-based.
fn keyword_list(keywords: &[String]) -> String {
    let mut text = String::from("Your keywords:");
    for (i, keyword) in keywords.iter().enumerate() {
        let _ = write!(text, "\n{}- {}", i + 1, keyword);
    }
    text
}

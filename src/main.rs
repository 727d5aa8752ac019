use std::path::Path;
use std::sync::Arc;

use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, ChatMemberUpdated};
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use relaybot::config::{Config, EnvOverrides};
use relaybot::relay::telegram::{incoming_message, source_chat};
use relaybot::relay::{
    open_store, Command, CommandContext, CommandHandler, DispatchEngine, SubscriptionStore, TelegramClient,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_CONFIG_PATH: &str = "relaybot.json";

struct BotState {
    engine: DispatchEngine,
    commands: CommandHandler,
    /// Used to ignore `/cmd@other_bot`.
    bot_username: Option<String>,
}

impl BotState {
    async fn new(config: &Config, bot: &Bot, store: Arc<dyn SubscriptionStore>) -> Self {
        let bot_username = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                Some(me.username().to_string())
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                None
            }
        };

        let transport = Arc::new(TelegramClient::new(bot.clone()));
        let engine = DispatchEngine::new(store.clone(), transport.clone(), config.delivery.clone());
        let commands = CommandHandler::new(store, transport, config.admin_ids.clone());

        Self { engine, commands, bot_username }
    }
}

/// Explicit path from the first argument, else `relaybot.json` if present,
/// else environment variables only.
fn load_config() -> Result<Config, relaybot::config::ConfigError> {
    let env = EnvOverrides::from_process();
    match std::env::args().nth(1) {
        Some(path) => Config::load(&path, &env),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH, &env),
        None => Config::from_env(&env),
    }
}

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relaybot: {e}");
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("relaybot: failed to set up logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

fn init_logging(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard, BoxError> {
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("relaybot.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    Ok(guard)
}

async fn run(config: Config) -> Result<(), BoxError> {
    info!("🚀 Starting relaybot...");
    match &config.config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("Loaded config from environment"),
    }
    if !config.admin_ids.is_empty() {
        info!("Admin IDs: {:?}", config.admin_ids);
    }

    let client = reqwest::ClientBuilder::new()
        .timeout(config.request_timeout)
        .build()?;
    let bot = Bot::with_client(&config.telegram_bot_token, client);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = open_store(config.storage, &config.data_dir)?;
    info!("📂 Using {:?} store at {}", config.storage, config.store_path().display());

    if let Err(e) = bot.set_my_commands(Command::menu()).await {
        warn!("Failed to register command menu: {e}");
    }

    let state = Arc::new(BotState::new(&config, &bot, store).await);

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_message))
        .branch(Update::filter_my_chat_member().endpoint(handle_my_chat_member));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match &config.webhook {
        Some(webhook) => {
            let listener = relaybot::webhook::listen(bot, webhook).await?;
            info!("📡 Listening for webhook updates on {}", webhook.listen_addr);
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            info!("📡 Long polling for updates");
            dispatcher.dispatch().await;
        }
    }

    info!("Dispatcher shut down");
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let chat = source_chat(&msg.chat);

    if let Some(text) = msg.text()
        && let Some(command) = Command::parse(text, state.bot_username.as_deref())
    {
        let user_id = msg.from.as_ref().map(|u| u.id.0 as i64);
        info!("⌨️ {:?} from {:?} in {}", command, user_id, chat.id);

        let ctx = CommandContext { user_id, chat };
        let reply = match state.commands.execute(command, &ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Command failed: {e}");
                "Something went wrong saving your data. Please try again.".to_string()
            }
        };
        if let Err(e) = bot.send_message(msg.chat.id, reply).await {
            warn!("Failed to reply in {}: {e}", msg.chat.id);
        }
        return Ok(());
    }

    if !chat.kind.is_watchable() {
        return Ok(());
    }

    let incoming = incoming_message(&msg);
    match state.engine.handle_incoming(&chat, &incoming).await {
        Ok(report) if !report.is_empty() => {
            debug!(
                "msg {} in {}: delivered {:?}, failed {:?}, unsubscribed {:?}",
                incoming.message_id, chat.id, report.delivered, report.failed, report.unsubscribed
            );
        }
        Ok(_) => {}
        Err(e) => error!("Dispatch of msg {} in {} failed: {e}", incoming.message_id, chat.id),
    }

    Ok(())
}

async fn handle_my_chat_member(update: ChatMemberUpdated, state: Arc<BotState>) -> ResponseResult<()> {
    match update.new_chat_member.status() {
        ChatMemberStatus::Left | ChatMemberStatus::Banned => {
            if let Err(e) = state.engine.handle_bot_removed(update.chat.id.0) {
                error!("Failed to unwatch chat {}: {e}", update.chat.id);
            }
        }
        ChatMemberStatus::Member | ChatMemberStatus::Administrator => {
            info!("👋 Added to chat {} ({})", update.chat.title().unwrap_or("untitled"), update.chat.id);
        }
        _ => {}
    }
    Ok(())
}

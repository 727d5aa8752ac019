use serde::Deserialize;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::relay::{DeliveryPolicy, StorageKind};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },

    #[error("invalid webhook url '{url}': {source}")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Values read from the process environment.
///
/// Collected once by the binary and passed in, so loading stays a pure
/// function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// `TELEGRAM_TOKEN`
    pub telegram_token: Option<String>,
    /// `WEBHOOK_URL`
    pub webhook_url: Option<String>,
    /// `PORT`
    pub port: Option<String>,
    /// `MAX_WEBHOOK_CONNECTIONS`
    pub max_webhook_connections: Option<String>,
}

impl EnvOverrides {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            telegram_token: var("TELEGRAM_TOKEN"),
            webhook_url: var("WEBHOOK_URL"),
            port: var("PORT"),
            max_webhook_connections: var("MAX_WEBHOOK_CONNECTIONS"),
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    /// Falls back to `TELEGRAM_TOKEN` when empty.
    #[serde(default)]
    telegram_bot_token: String,
    /// Directory for the store and logs. Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default)]
    storage: StorageKind,
    /// Users allowed to manage watched chats. Empty = everyone.
    #[serde(default)]
    admin_ids: Vec<i64>,
    webhook: Option<WebhookFile>,
    #[serde(default)]
    delivery: DeliveryFile,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

#[derive(Deserialize)]
struct WebhookFile {
    url: String,
    #[serde(default = "default_listen_addr")]
    listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    max_connections: u8,
    #[serde(default = "default_setup_attempts")]
    setup_attempts: u32,
}

#[derive(Deserialize)]
struct DeliveryFile {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
}

impl Default for DeliveryFile {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

const DEFAULT_PORT: u16 = 8000;

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

fn default_max_connections() -> u8 {
    40
}

fn default_setup_attempts() -> u32 {
    6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Webhook mode settings. Without them the bot long-polls.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Public URL Telegram posts updates to.
    pub url: Url,
    /// Local address the HTTP server binds.
    pub listen_addr: SocketAddr,
    /// 1-100, passed to `setWebhook`.
    pub max_connections: u8,
    /// Attempts at registering the webhook before giving up.
    pub setup_attempts: u32,
    pub setup_backoff: Duration,
}

pub struct Config {
    /// `None` when started from environment variables alone.
    pub config_path: Option<PathBuf>,
    pub telegram_bot_token: String,
    /// Directory for the store and logs.
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    pub admin_ids: HashSet<i64>,
    pub webhook: Option<WebhookConfig>,
    pub delivery: DeliveryPolicy,
    /// Timeout for each Telegram API request.
    pub request_timeout: Duration,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P, env: &EnvOverrides) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        Self::build(file, Some(config_path), env)
    }

    /// Configuration from environment variables only, all other settings at
    /// their defaults.
    pub fn from_env(env: &EnvOverrides) -> Result<Self, ConfigError> {
        Self::build(ConfigFile { request_timeout_secs: default_request_timeout_secs(), ..Default::default() }, None, env)
    }

    fn build(file: ConfigFile, config_path: Option<PathBuf>, env: &EnvOverrides) -> Result<Self, ConfigError> {
        let telegram_bot_token = if file.telegram_bot_token.is_empty() {
            env.telegram_token.clone().unwrap_or_default()
        } else {
            file.telegram_bot_token
        };
        validate_token(&telegram_bot_token)?;

        let webhook = match file.webhook {
            Some(webhook) => Some(webhook_config(webhook)?),
            None => webhook_from_env(env)?,
        };

        let delivery = &file.delivery;
        if delivery.max_attempts == 0 {
            return Err(ConfigError::Validation("delivery.max_attempts must be at least 1".into()));
        }
        if delivery.initial_backoff_ms > delivery.max_backoff_ms {
            return Err(ConfigError::Validation(
                "delivery.initial_backoff_ms must not exceed delivery.max_backoff_ms".into(),
            ));
        }
        if file.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("request_timeout_secs must be positive".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token,
            data_dir,
            storage: file.storage,
            admin_ids: file.admin_ids.into_iter().collect(),
            webhook,
            delivery: DeliveryPolicy {
                max_attempts: delivery.max_attempts,
                initial_backoff: Duration::from_millis(delivery.initial_backoff_ms),
                max_backoff: Duration::from_millis(delivery.max_backoff_ms),
            },
            request_timeout: Duration::from_secs(file.request_timeout_secs),
        })
    }

    /// Path of the subscription store inside `data_dir`.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(self.storage.file_name())
    }
}

fn validate_token(token: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram_bot_token is required (or set TELEGRAM_TOKEN)".into(),
        ));
    }
    // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
    match token.split_once(':') {
        Some((id, secret)) if id.parse::<u64>().is_ok() && !secret.is_empty() && !secret.contains(':') => Ok(()),
        _ => Err(ConfigError::Validation(
            "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
        )),
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl { url: raw.to_string(), source: e })?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(ConfigError::Validation(format!("webhook url must be http(s): {raw}")));
    }
    Ok(url)
}

fn check_max_connections(value: u8) -> Result<u8, ConfigError> {
    if (1..=100).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Validation(format!("webhook max_connections must be 1-100, got {value}")))
    }
}

fn webhook_config(file: WebhookFile) -> Result<WebhookConfig, ConfigError> {
    if file.setup_attempts == 0 {
        return Err(ConfigError::Validation("webhook.setup_attempts must be at least 1".into()));
    }
    Ok(WebhookConfig {
        url: parse_url(&file.url)?,
        listen_addr: file.listen_addr,
        max_connections: check_max_connections(file.max_connections)?,
        setup_attempts: file.setup_attempts,
        setup_backoff: Duration::from_secs(1),
    })
}

fn webhook_from_env(env: &EnvOverrides) -> Result<Option<WebhookConfig>, ConfigError> {
    let Some(raw_url) = env.webhook_url.as_deref() else {
        return Ok(None);
    };

    let port = match env.port.as_deref() {
        Some(port) => port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::Validation(format!("PORT must be a port number, got '{port}'")))?,
        None => DEFAULT_PORT,
    };
    let max_connections = match env.max_webhook_connections.as_deref() {
        Some(raw) => raw.trim().parse::<u8>().map_err(|_| {
            ConfigError::Validation(format!("MAX_WEBHOOK_CONNECTIONS must be 1-100, got '{raw}'"))
        })?,
        None => default_max_connections(),
    };

    Ok(Some(WebhookConfig {
        url: parse_url(raw_url)?,
        listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        max_connections: check_max_connections(max_connections)?,
        setup_attempts: default_setup_attempts(),
        setup_backoff: Duration::from_secs(1),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env() -> EnvOverrides {
        EnvOverrides::default()
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_minimal_config_defaults() {
        let file = write_config(&format!(r#"{{ "telegram_bot_token": "{TOKEN}" }}"#));
        let config = Config::load(file.path(), &no_env()).expect("should load valid config");
        assert_eq!(config.telegram_bot_token, TOKEN);
        assert_eq!(config.storage, StorageKind::Json);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert!(config.admin_ids.is_empty());
        assert!(config.webhook.is_none());
        assert_eq!(config.delivery, DeliveryPolicy::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.store_path(), PathBuf::from("./db.json"));
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(&format!(
            r#"{{
            "telegram_bot_token": "{TOKEN}",
            "data_dir": "/var/lib/relaybot",
            "storage": "sqlite",
            "admin_ids": [1, 2],
            "webhook": {{ "url": "https://bot.example.com/webhook", "listen_addr": "127.0.0.1:9000", "max_connections": 10 }},
            "delivery": {{ "max_attempts": 5, "initial_backoff_ms": 100, "max_backoff_ms": 1000 }},
            "request_timeout_secs": 10
        }}"#
        ));
        let config = Config::load(file.path(), &no_env()).unwrap();
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/relaybot/bot.db"));
        assert!(config.admin_ids.contains(&2));

        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url.path(), "/webhook");
        assert_eq!(webhook.listen_addr.port(), 9000);
        assert_eq!(webhook.max_connections, 10);
        assert_eq!(webhook.setup_attempts, 6);

        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_token_from_env() {
        let file = write_config(r#"{ "storage": "sqlite" }"#);
        let env = EnvOverrides { telegram_token: Some(TOKEN.into()), ..Default::default() };
        let config = Config::load(file.path(), &env).unwrap();
        assert_eq!(config.telegram_bot_token, TOKEN);
    }

    #[test]
    fn test_file_token_wins_over_env() {
        let file = write_config(&format!(r#"{{ "telegram_bot_token": "{TOKEN}" }}"#));
        let env = EnvOverrides { telegram_token: Some("1:other".into()), ..Default::default() };
        let config = Config::load(file.path(), &env).unwrap();
        assert_eq!(config.telegram_bot_token, TOKEN);
    }

    #[test]
    fn test_from_env_with_webhook() {
        let env = EnvOverrides {
            telegram_token: Some(TOKEN.into()),
            webhook_url: Some("https://relay.onrender.com/webhook".into()),
            port: Some("10000".into()),
            max_webhook_connections: None,
        };
        let config = Config::from_env(&env).unwrap();
        assert!(config.config_path.is_none());
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.listen_addr, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 10000)));
        assert_eq!(webhook.max_connections, 40);
    }

    #[test]
    fn test_from_env_without_token() {
        let err = assert_err(Config::from_env(&no_env()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("TELEGRAM_TOKEN"));
    }

    #[test]
    fn test_invalid_port_env() {
        let env = EnvOverrides {
            telegram_token: Some(TOKEN.into()),
            webhook_url: Some("https://relay.example.com/webhook".into()),
            port: Some("eighty".into()),
            max_webhook_connections: None,
        };
        let err = assert_err(Config::from_env(&env));
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{ "telegram_bot_token": "invalid_token_no_colon" }"#);
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{ "telegram_bot_token": "notanumber:ABCdef" }"#);
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:" }"#);
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_webhook_url() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "webhook": {{ "url": "not a url" }} }}"#
        ));
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_webhook_max_connections_range() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "webhook": {{ "url": "https://x.example/", "max_connections": 0 }} }}"#
        ));
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let file = write_config(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "delivery": {{ "max_attempts": 0 }} }}"#
        ));
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_unknown_storage_rejected() {
        let file = write_config(&format!(r#"{{ "telegram_bot_token": "{TOKEN}", "storage": "redis" }}"#));
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json", &no_env()));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path(), &no_env()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}

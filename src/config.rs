//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default interval between signal store polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default capacity of the deferred-reply scheduler.
pub const DEFAULT_MAX_PENDING_REPLIES: usize = 1000;

/// Process configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AutoreplyConfig {
    /// Telegram bot token used by the chat transport.
    pub bot_token: SecretString,
    /// Chat that receives self-notifications ("started").
    pub owner_chat_id: Option<i64>,
    /// libSQL database file holding chats and keywords.
    pub db_path: PathBuf,
    /// Redis URL for the signal store. `None` selects the in-process store.
    pub redis_url: Option<String>,
    /// Persisted session credential, removed on logout.
    pub session_file: PathBuf,
    /// How often the session loop polls the signal store.
    pub poll_interval: Duration,
    /// Operator API port.
    pub api_port: u16,
    /// Maximum deferred replies waiting to fire.
    pub max_pending_replies: usize,
}

impl AutoreplyConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()))?;

        let owner_chat_id = parse_opt::<i64, _>(&lookup, "TELEGRAM_OWNER_CHAT_ID")?;

        let db_path = lookup("AUTOREPLY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/autoreply.db"));

        let redis_url = lookup("REDIS_URL").filter(|s| !s.trim().is_empty());

        let session_file = lookup("AUTOREPLY_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("main.session"));

        let poll_interval = parse_opt::<u64, _>(&lookup, "AUTOREPLY_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_POLL_INTERVAL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let api_port = parse_opt::<u16, _>(&lookup, "AUTOREPLY_API_PORT")?.unwrap_or(8080);

        let max_pending_replies = parse_opt::<usize, _>(&lookup, "AUTOREPLY_MAX_PENDING_REPLIES")?
            .unwrap_or(DEFAULT_MAX_PENDING_REPLIES);

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            owner_chat_id,
            db_path,
            redis_url,
            session_file,
            poll_interval,
            api_port,
            max_pending_replies,
        })
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

//! Configuration management
//!
//! Everything comes from environment variables (a `.env` file is loaded by
//! `main` through dotenvy). A missing token or operator id is fatal: the relay
//! refuses to start instead of running half-configured.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Bot token is not set (RELAY_BOT_TOKEN)")]
    MissingToken,
    #[error("Operator id is not set (RELAY_OPERATOR_ID)")]
    MissingOperator,
    #[error("Topic mode needs the admin group id (RELAY_GROUP_CHAT_ID)")]
    MissingGroupChat,
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// How contacts reach the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Everything lands in the operator's private chat
    Direct,
    /// Each contact gets a forum topic in an admin group
    Topic { group_chat_id: i64 },
}

impl RelayMode {
    pub fn label(&self) -> &'static str {
        match self {
            RelayMode::Direct => "direct",
            RelayMode::Topic { .. } => "topic",
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub bot_token: String,

    /// The one administrative user
    pub operator_id: i64,

    pub mode: RelayMode,

    /// Optional proxy URL for the bot client (http, https or socks5)
    pub proxy: Option<String>,

    /// Case-insensitive substrings that get a message dropped
    pub block_keywords: Vec<String>,

    /// Directory holding blocklist.json and group_topics.json
    pub data_dir: PathBuf,

    /// How long acknowledgements stay visible to contacts
    pub ack_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = var("RELAY_BOT_TOKEN")
            .or_else(|| var("TELOXIDE_TOKEN"))
            .ok_or(ConfigError::MissingToken)?;

        let operator_id = match var("RELAY_OPERATOR_ID") {
            Some(raw) => parse_i64("RELAY_OPERATOR_ID", &raw)?,
            None => return Err(ConfigError::MissingOperator),
        };

        let mode = match var("RELAY_MODE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("direct") | Some("private") => RelayMode::Direct,
            Some("topic") | Some("group") => {
                let raw = var("RELAY_GROUP_CHAT_ID").ok_or(ConfigError::MissingGroupChat)?;
                RelayMode::Topic {
                    group_chat_id: parse_i64("RELAY_GROUP_CHAT_ID", &raw)?,
                }
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "RELAY_MODE",
                    value: other.to_string(),
                })
            }
        };

        let block_keywords = var("RELAY_BLOCK_KEYWORDS")
            .map(|raw| parse_keywords(&raw))
            .unwrap_or_default();

        let data_dir = var("RELAY_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("relaybot")
        });

        let ack_delay = match var("RELAY_ACK_DELAY_SECS") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "RELAY_ACK_DELAY_SECS",
                value: raw.clone(),
            })?),
            None => Duration::from_secs(10),
        };

        Ok(Self {
            bot_token,
            operator_id,
            mode,
            proxy: var("RELAY_PROXY"),
            block_keywords,
            data_dir,
            ack_delay,
        })
    }
}

fn parse_i64(key: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Split a comma separated keyword list, dropping blanks
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
}

#[derive(Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Static instructions sent with every prompt. `None` when disabled.
    pub system_prompt: Option<String>,
    pub stream_replies: bool,
    pub stream_edit_interval: Duration,
}

/// Process-wide configuration, built once at startup and never mutated.
#[derive(Debug)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub gemini: GeminiConfig,
    pub relay: RelayConfig,
}

fn default_system_prompt() -> String {
    "You are an educational assistant that helps users learn new subjects. \
     Explain concepts clearly, give useful examples, and adapt to the user's level. \
     For technical subjects, include code examples when relevant."
        .to_string()
}

fn default_stream_edit_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = required(&lookup, "TELEGRAM_BOT_TOKEN")?;
        validate_bot_token(&bot_token)?;

        let api_key = required(&lookup, "GEMINI_API_KEY")?;
        if api_key.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                var: "GEMINI_API_KEY",
                reason: "must not contain whitespace".to_string(),
            });
        }

        let model = optional(&lookup, "GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = optional(&lookup, "GEMINI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "GEMINI_BASE_URL",
                reason: format!("expected an http(s) URL, got {:?}", base_url),
            });
        }

        // An explicitly empty SYSTEM_PROMPT turns the instructions off.
        let system_prompt = match lookup("SYSTEM_PROMPT") {
            None => Some(default_system_prompt()),
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value),
        };

        let stream_replies = match optional(&lookup, "STREAM_REPLIES") {
            Some(value) => parse_bool("STREAM_REPLIES", &value)?,
            None => true,
        };
        let edit_interval_ms = match optional(&lookup, "STREAM_EDIT_INTERVAL_MS") {
            Some(value) => parse_u64("STREAM_EDIT_INTERVAL_MS", &value)?,
            None => default_stream_edit_interval_ms(),
        };
        let timeout_secs = match optional(&lookup, "REQUEST_TIMEOUT_SECS") {
            Some(value) => parse_u64("REQUEST_TIMEOUT_SECS", &value)?,
            None => default_request_timeout_secs(),
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Config {
            telegram: TelegramConfig {
                bot_token: SecretString::new(bot_token),
            },
            gemini: GeminiConfig {
                api_key: SecretString::new(api_key),
                model,
                base_url,
                request_timeout: Duration::from_secs(timeout_secs),
            },
            relay: RelayConfig {
                system_prompt,
                stream_replies,
                stream_edit_interval: Duration::from_millis(edit_interval_ms),
            },
        })
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, var).ok_or(ConfigError::Missing(var))
}

fn optional<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Telegram tokens look like `123456789:AA...`.
fn validate_bot_token(token: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        var: "TELEGRAM_BOT_TOKEN",
        reason: reason.to_string(),
    };

    let (bot_id, secret) = token
        .split_once(':')
        .ok_or_else(|| invalid("expected <bot id>:<secret>"))?;
    if bot_id.is_empty() || !bot_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("bot id must be numeric"));
    }
    if secret.is_empty() || secret.chars().any(char::is_whitespace) {
        return Err(invalid("secret part is empty or contains whitespace"));
    }
    Ok(())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got {:?}", other),
        }),
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|e| ConfigError::Invalid {
        var,
        reason: format!("{} ({:?})", e, value),
    })
}

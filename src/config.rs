use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use teloxide::types::ChatId;

use crate::tracker::gemini::DEFAULT_MODEL;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Kuala_Lumpur;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A variable is set but its value can't be used.
    Invalid { var: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { var, value, reason } => {
                write!(f, "invalid {var} '{value}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process-wide settings, read once at startup.
///
/// Only the port, time zone and debug flag always have values. Every
/// credential is optional: a missing one switches its feature off.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub google_sheets_id: Option<String>,
    /// Service account key JSON, inline.
    pub google_credentials_json: Option<String>,
    /// Local SQLite ledger, used when Sheets isn't configured.
    pub ledger_db_path: Option<PathBuf>,
    /// Calendar used for "today" and "this month".
    pub timezone: Tz,
    pub port: u16,
    pub debug: bool,
    /// Directory for log files. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
    /// Chat that receives WARN and ERROR logs.
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    /// Load from the process environment, after merging a `.env` file if
    /// one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN");

        let port = match get("PORT") {
            Some(value) => value.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                value,
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let timezone = match get("BOT_TIMEZONE") {
            Some(value) => Tz::from_str(&value).map_err(|e| ConfigError::Invalid {
                var: "BOT_TIMEZONE",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let log_chat_id = match get("LOG_CHAT_ID") {
            Some(value) => Some(ChatId(value.parse::<i64>().map_err(|e| ConfigError::Invalid {
                var: "LOG_CHAT_ID",
                value: value.clone(),
                reason: e.to_string(),
            })?)),
            None => None,
        };

        Ok(Self {
            telegram_bot_token,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            google_sheets_id: get("GOOGLE_SHEETS_ID"),
            google_credentials_json: get("GOOGLE_CREDENTIALS_JSON"),
            ledger_db_path: get("LEDGER_DB_PATH").map(PathBuf::from),
            timezone,
            port,
            debug: get("DEBUG").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            log_chat_id,
        })
    }

    /// False when a token is set but isn't shaped like `{bot_id}:{secret}`.
    /// Such a token is still used; Telegram gets the final say.
    pub fn token_looks_valid(&self) -> bool {
        let Some(token) = &self.telegram_bot_token else {
            return true;
        };
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let parts: Vec<&str> = token.split(':').collect();
        parts.len() == 2 && parts[0].parse::<u64>().is_ok() && !parts[1].is_empty()
    }

    pub fn sheets_configured(&self) -> bool {
        self.google_sheets_id.is_some() && self.google_credentials_json.is_some()
    }

    /// Names of the core variables that are missing, for the startup warning.
    pub fn missing_core_vars(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.telegram_bot_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        missing
    }
}

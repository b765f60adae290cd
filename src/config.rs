//! Configuration types for the bot.
//!
//! Loaded from `config.toml` (every field optional) and then patched from
//! the environment so a container deployment can keep secrets out of the
//! file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Discord REST settings.
    pub discord: DiscordConfig,
    /// Generative language API settings.
    pub llm: LlmConfig,
    /// Recurring reminder settings.
    pub reminders: ReminderConfig,
    /// Conversation memory and routing settings.
    pub chat: ChatConfig,
    /// HTTP gateway and keepalive settings.
    pub gateway: GatewayConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Discord REST configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token (`DISCORD_BOT_TOKEN` overrides).
    pub bot_token: String,
    /// REST base URL including the API version.
    pub api_base_url: String,
    /// Channel where every message gets a reply.
    pub main_channel_id: Option<String>,
    /// The bot's own user id, used for mention detection.
    pub bot_user_id: Option<String>,
    /// Per-request timeout for REST calls.
    pub request_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://discord.com/api/v10".to_owned(),
            main_channel_id: None,
            bot_user_id: None,
            request_timeout_secs: 15,
        }
    }
}

/// Gemini `generateContent` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key (`GEMINI_API_KEY` overrides).
    pub api_key: String,
    /// API base URL.
    pub api_base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Maximum tokens per reply.
    pub max_output_tokens: u32,
    /// Optional text prepended to every prompt.
    pub system_prompt: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: "gemini-1.5-flash".to_owned(),
            temperature: 0.9,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 1000,
            system_prompt: None,
            request_timeout_secs: 60,
        }
    }
}

/// Recurring reminder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Persisted reminder state.
    pub state_path: PathBuf,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Pause between two dispatches within one tick.
    pub dispatch_delay_ms: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            state_path: crate::bot_dirs::reminders_file(),
            tick_interval_secs: 30,
            dispatch_delay_ms: 500,
        }
    }
}

/// Conversation memory and routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Persisted conversation memory.
    pub memory_path: PathBuf,
    /// Turns retained per user.
    pub max_turns_per_user: usize,
    /// Answered turns replayed into each prompt.
    pub context_turns: usize,
    /// Names that make the bot answer outside its main channel.
    pub trigger_names: Vec<String>,
    /// Discord's message length limit.
    pub max_reply_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_path: crate::bot_dirs::memory_file(),
            max_turns_per_user: 20,
            context_turns: 10,
            trigger_names: vec!["nikki".to_owned(), "nikhita".to_owned()],
            max_reply_chars: 2000,
        }
    }
}

/// HTTP gateway and keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Whether to serve the HTTP gateway.
    pub enabled: bool,
    /// Bind host.
    pub host: String,
    /// Bind port (`PORT` overrides).
    pub port: u16,
    /// Bearer token required on command/message routes.
    pub bearer_token: Option<String>,
    /// URL fetched periodically to keep a free-tier host awake (`PING_URL` overrides).
    pub ping_url: Option<String>,
    /// Seconds between keepalive pings.
    pub ping_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_owned(),
            port: 10_000,
            bearer_token: None,
            ping_url: None,
            ping_interval_secs: 600,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            log_dir: None,
        }
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssueSeverity {
    Warning,
    Error,
}

/// Configuration problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub id: String,
    pub severity: ConfigIssueSeverity,
    pub summary: String,
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::BotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Config path: `NIKKI_CONFIG` if set, else `config_dir()/config.toml`.
    pub fn default_config_path() -> PathBuf {
        std::env::var_os("NIKKI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(crate::bot_dirs::config_file)
    }

    /// Load from [`Self::default_config_path`] (defaults when the file is
    /// missing) and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> crate::error::Result<Self> {
        let path = Self::default_config_path();
        let mut config = if path.is_file() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Patch secrets and deployment settings from a key lookup.
    ///
    /// Recognised keys: `DISCORD_BOT_TOKEN`, `GEMINI_API_KEY`, `PORT`,
    /// `PING_URL`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(e) => tracing::warn!("ignoring invalid PORT `{port}`: {e}"),
            }
        }
        if let Some(url) = get("PING_URL") {
            self.gateway.ping_url = Some(url);
        }
    }

    /// Check the configuration without touching the network.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.discord.bot_token.trim().is_empty() {
            issues.push(ConfigIssue {
                id: "discord-missing-token".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "Discord bot token is empty; reminders cannot be delivered.".to_owned(),
            });
        }
        if self.llm.api_key.trim().is_empty() {
            issues.push(ConfigIssue {
                id: "llm-missing-api-key".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "Gemini API key is empty; chat replies will fail.".to_owned(),
            });
        }
        if self.reminders.tick_interval_secs == 0 {
            issues.push(ConfigIssue {
                id: "reminders-zero-tick".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "Reminder tick interval must be at least one second.".to_owned(),
            });
        }
        if self.chat.max_reply_chars == 0 {
            issues.push(ConfigIssue {
                id: "chat-zero-reply-limit".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "Reply chunk size must be positive.".to_owned(),
            });
        }
        if self.gateway.enabled
            && self.gateway.host.trim() == "0.0.0.0"
            && self
                .gateway
                .bearer_token
                .as_ref()
                .is_none_or(|t| t.trim().is_empty())
        {
            issues.push(ConfigIssue {
                id: "gateway-public-without-auth".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "Binding to 0.0.0.0 without a bearer token exposes command routes."
                    .to_owned(),
            });
        }

        issues
    }
}

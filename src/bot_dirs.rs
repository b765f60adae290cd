//! Centralized directory paths for the bot.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Data | `~/.local/share/nikki/` | `~/Library/Application Support/nikki/` |
//! | Config | `~/.config/nikki/` | `~/Library/Application Support/nikki/` |
//!
//! # Environment Overrides
//!
//! - `NIKKI_DATA_DIR` overrides [`data_dir`]
//! - `NIKKI_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Persistent state root (reminders, conversation memory, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NIKKI_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("nikki"))
        .unwrap_or_else(|| PathBuf::from("/tmp/nikki-data"))
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NIKKI_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("nikki"))
        .unwrap_or_else(|| PathBuf::from("/tmp/nikki-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Reminder state file (`data_dir()/reminders.json`).
#[must_use]
pub fn reminders_file() -> PathBuf {
    data_dir().join("reminders.json")
}

/// Conversation memory file (`data_dir()/conversation_memory.json`).
#[must_use]
pub fn memory_file() -> PathBuf {
    data_dir().join("conversation_memory.json")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

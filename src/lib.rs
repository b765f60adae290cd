//! Nikki: a Discord companion bot with durable recurring reminders.
//!
//! # Architecture
//!
//! - **Scheduler**: reminder store, startup catch-up and the periodic tick
//!   loop that dispatches due reminders through a messaging port
//! - **Channels**: Discord REST delivery plus an HTTP gateway for inbound
//!   commands and chat
//! - **Chat**: per-user conversation memory and the Gemini client
//! - **Commands**: `/remind`, `/reminders`, `/forget` and friends

pub mod bot_dirs;
pub mod channels;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
#[doc(hidden)]
pub mod test_utils;

pub use config::BotConfig;
pub use error::{BotError, ReminderError, Result};

//! Decides which inbound messages get a reply and shapes the reply.

use crate::config::{ChatConfig, DiscordConfig};
use serde::Deserialize;

/// A chat message forwarded to the bot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundChat {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    pub channel_id: String,
    pub content: String,
    #[serde(default)]
    pub is_dm: bool,
    #[serde(default)]
    pub author_is_bot: bool,
}

/// When to answer.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    pub main_channel_id: Option<String>,
    pub bot_user_id: Option<String>,
    /// Lowercase names that trigger a reply anywhere.
    pub trigger_names: Vec<String>,
}

impl RoutingPolicy {
    #[must_use]
    pub fn from_config(discord: &DiscordConfig, chat: &ChatConfig) -> Self {
        Self {
            main_channel_id: discord.main_channel_id.clone(),
            bot_user_id: discord.bot_user_id.clone(),
            trigger_names: chat
                .trigger_names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Answer in the main channel, in DMs, on mention, or on a trigger name.
    #[must_use]
    pub fn should_respond(&self, message: &InboundChat) -> bool {
        if message.author_is_bot || self.is_self(&message.user_id) {
            return false;
        }
        if self.main_channel_id.as_deref() == Some(message.channel_id.as_str()) {
            return true;
        }
        if message.is_dm || self.mentions_bot(&message.content) {
            return true;
        }
        let lowered = message.content.to_lowercase();
        self.trigger_names.iter().any(|name| lowered.contains(name))
    }

    /// Remove `<@id>` and `<@!id>` mentions of the bot and trim.
    #[must_use]
    pub fn strip_mentions(&self, content: &str) -> String {
        let Some(id) = self.bot_user_id.as_deref() else {
            return content.trim().to_owned();
        };
        content
            .replace(&format!("<@!{id}>"), "")
            .replace(&format!("<@{id}>"), "")
            .trim()
            .to_owned()
    }

    fn is_self(&self, user_id: &str) -> bool {
        self.bot_user_id.as_deref() == Some(user_id)
    }

    fn mentions_bot(&self, content: &str) -> bool {
        self.bot_user_id.as_deref().is_some_and(|id| {
            content.contains(&format!("<@{id}>")) || content.contains(&format!("<@!{id}>"))
        })
    }
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Cuts on character boundaries only. An empty reply yields no chunks.
#[must_use]
pub fn split_reply(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

//! Per-user conversation memory.
//!
//! Keeps a bounded window of recent turns per user and persists the whole
//! map as JSON after every answered turn. The file layout is
//! `{ user_id: { username, conversations: [...], user_info } }`.

use crate::scheduler::reminder::deserialize_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, error};

/// One prompt and, once answered, its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub user: String,
    #[serde(default)]
    pub response: Option<String>,
}

/// Everything remembered about one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMemory {
    pub username: String,
    #[serde(default)]
    pub conversations: VecDeque<Turn>,
    #[serde(default)]
    pub user_info: serde_json::Map<String, serde_json::Value>,
}

/// Totals for the stats command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub users: usize,
    pub turns: usize,
}

/// Conversation memory for every user the bot has talked to.
#[derive(Debug)]
pub struct ConversationMemory {
    users: BTreeMap<String, UserMemory>,
    max_turns: usize,
    /// `None` keeps everything in memory only.
    path: Option<PathBuf>,
}

impl ConversationMemory {
    /// Load memory from `path`; a missing file starts empty.
    pub fn open(path: Option<PathBuf>, max_turns: usize) -> crate::Result<Self> {
        let users = match path.as_deref() {
            None => BTreeMap::new(),
            Some(p) => match std::fs::read(p) {
                Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                    crate::BotError::Memory(format!("cannot parse {}: {e}", p.display()))
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => {
                    return Err(crate::BotError::Memory(format!(
                        "cannot read {}: {e}",
                        p.display()
                    )));
                }
            },
        };
        debug!(users = users.len(), "conversation memory loaded");
        Ok(Self {
            users,
            max_turns: max_turns.max(1),
            path,
        })
    }

    /// Memory that is never written to disk.
    #[must_use]
    pub fn in_memory(max_turns: usize) -> Self {
        Self {
            users: BTreeMap::new(),
            max_turns: max_turns.max(1),
            path: None,
        }
    }

    /// Append an unanswered turn, evicting the oldest beyond the cap.
    pub fn record_prompt(&mut self, user_id: &str, username: &str, text: &str, now: DateTime<Utc>) {
        let entry = self.users.entry(user_id.to_owned()).or_default();
        if entry.username.is_empty() {
            entry.username = username.to_owned();
        }
        entry.conversations.push_back(Turn {
            timestamp: now,
            user: text.to_owned(),
            response: None,
        });
        while entry.conversations.len() > self.max_turns {
            entry.conversations.pop_front();
        }
    }

    /// Attach a reply to the newest turn and persist.
    ///
    /// Returns `false` when the user has no pending turn.
    pub fn record_response(&mut self, user_id: &str, reply: &str) -> bool {
        let Some(turn) = self
            .users
            .get_mut(user_id)
            .and_then(|u| u.conversations.back_mut())
        else {
            return false;
        };
        turn.response = Some(reply.to_owned());
        self.persist();
        true
    }

    /// Prompt text for the model: optional system prompt, recent answered
    /// turns, then the current message.
    #[must_use]
    pub fn build_context(
        &self,
        user_id: &str,
        current: &str,
        system_prompt: Option<&str>,
        context_turns: usize,
    ) -> String {
        let mut context = String::new();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            context.push_str(prompt.trim());
            context.push_str("\n\n");
        }

        let Some(user) = self.users.get(user_id) else {
            context.push_str(&format!("user: {current}"));
            return context;
        };
        let name = if user.username.is_empty() {
            "user"
        } else {
            user.username.as_str()
        };
        context.push_str(&format!("You're chatting with {name}.\n"));

        let answered: Vec<&Turn> = user
            .conversations
            .iter()
            .filter(|t| t.response.is_some())
            .collect();
        let recent = &answered[answered.len().saturating_sub(context_turns)..];
        if !recent.is_empty() {
            context.push_str("Recent conversation:\n\n");
            for turn in recent {
                let reply = turn.response.as_deref().unwrap_or_default();
                context.push_str(&format!("{name}: {}\nassistant: {reply}\n\n", turn.user));
            }
        }
        context.push_str(&format!("{name}: {current}"));
        context
    }

    /// Clear a user's turns. Returns whether the user was known.
    pub fn forget(&mut self, user_id: &str) -> bool {
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        user.conversations.clear();
        self.persist();
        true
    }

    /// Stored turns for a user, `None` if never seen.
    #[must_use]
    pub fn turn_count(&self, user_id: &str) -> Option<usize> {
        self.users.get(user_id).map(|u| u.conversations.len())
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            users: self.users.len(),
            turns: self.users.values().map(|u| u.conversations.len()).sum(),
        }
    }

    /// Write the memory file.
    pub fn save(&self) -> crate::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::BotError::Memory(format!("cannot create memory dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&self.users)
            .map_err(|e| crate::BotError::Memory(format!("cannot serialize memory: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| crate::BotError::Memory(format!("cannot write memory: {e}")))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!(error = %e, "conversation memory not saved");
        }
    }
}

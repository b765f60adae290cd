//! Conversational replies backed by per-user memory and a language model.

pub mod gemini;
pub mod memory;
pub mod router;

pub use gemini::{GeminiClient, LanguageModel};
pub use memory::{ConversationMemory, MemoryStats};
pub use router::{InboundChat, RoutingPolicy, split_reply};

use crate::config::ChatConfig;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Reply sent when the model call fails.
pub const APOLOGY: &str = "Ugh, something went wrong on my end. Can you try again?";

/// Memory shared between the chat service and commands.
pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

/// Lock shared memory, mapping poisoning to a memory error.
pub fn lock_memory(memory: &SharedMemory) -> crate::Result<MutexGuard<'_, ConversationMemory>> {
    memory
        .lock()
        .map_err(|_| crate::BotError::Memory("conversation memory lock poisoned".to_owned()))
}

/// Outcome of handling one routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Reply text split to the platform's message limit.
    pub chunks: Vec<String>,
    /// `false` when the model failed and the apology was sent instead.
    pub answered: bool,
}

/// Routes, remembers and answers chat messages.
pub struct ChatService {
    memory: SharedMemory,
    model: Arc<dyn LanguageModel>,
    policy: RoutingPolicy,
    system_prompt: Option<String>,
    context_turns: usize,
    max_reply_chars: usize,
}

impl ChatService {
    pub fn new(
        memory: SharedMemory,
        model: Arc<dyn LanguageModel>,
        policy: RoutingPolicy,
        config: &ChatConfig,
    ) -> Self {
        Self {
            memory,
            model,
            policy,
            system_prompt: None,
            context_turns: config.context_turns,
            max_reply_chars: config.max_reply_chars,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Answer `message` if routing says so; `Ok(None)` when ignored.
    ///
    /// The memory lock is released while the model is running.
    pub async fn handle(
        &self,
        message: &InboundChat,
        now: DateTime<Utc>,
    ) -> crate::Result<Option<ChatReply>> {
        if !self.policy.should_respond(message) {
            return Ok(None);
        }
        let prompt = self.policy.strip_mentions(&message.content);
        if prompt.is_empty() {
            return Ok(None);
        }

        let context = {
            let mut memory = lock_memory(&self.memory)?;
            memory.record_prompt(&message.user_id, &message.username, &prompt, now);
            memory.build_context(
                &message.user_id,
                &prompt,
                self.system_prompt.as_deref(),
                self.context_turns,
            )
        };

        let reply = match self.model.generate(&context).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user = %message.user_id, error = %e, "chat reply failed");
                return Ok(Some(ChatReply {
                    chunks: vec![APOLOGY.to_owned()],
                    answered: false,
                }));
            }
        };

        lock_memory(&self.memory)?.record_response(&message.user_id, &reply);
        let chunks = split_reply(&reply, self.max_reply_chars);
        debug!(user = %message.user_id, chunks = chunks.len(), "chat reply ready");
        Ok(Some(ChatReply {
            chunks,
            answered: true,
        }))
    }
}

//! Shared test doubles used by unit and integration tests.

use crate::channels::traits::{
    ChannelRef, DispatchError, Messenger, ReminderNotification, UserRef,
};
use crate::chat::LanguageModel;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory [`Messenger`] that records every delivery.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    channels: Mutex<HashMap<String, String>>,
    users: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<(String, ReminderNotification)>>,
    fail_sends: AtomicBool,
    fail_lookups: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a channel resolvable.
    pub fn with_channel(self, id: &str) -> Self {
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(id.to_owned(), format!("channel-{id}"));
        }
        self
    }

    /// Make a user resolvable.
    pub fn with_user(self, id: &str, name: &str) -> Self {
        if let Ok(mut users) = self.users.lock() {
            users.insert(id.to_owned(), name.to_owned());
        }
        self
    }

    pub fn remove_channel(&self, id: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(id);
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Deliveries so far as `(channel id, notification)`.
    pub fn sent(&self) -> Vec<(String, ReminderNotification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn check_lookups(&self) -> Result<(), DispatchError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DispatchError("lookup unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn id(&self) -> &'static str {
        "recording"
    }

    async fn resolve_channel(&self, channel_id: &str) -> Result<Option<ChannelRef>, DispatchError> {
        self.check_lookups()?;
        let channels = self
            .channels
            .lock()
            .map_err(|_| DispatchError("poisoned".to_owned()))?;
        Ok(channels.get(channel_id).map(|name| ChannelRef {
            id: channel_id.to_owned(),
            name: Some(name.clone()),
        }))
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserRef>, DispatchError> {
        self.check_lookups()?;
        let users = self
            .users
            .lock()
            .map_err(|_| DispatchError("poisoned".to_owned()))?;
        Ok(users.get(user_id).map(|name| UserRef {
            id: user_id.to_owned(),
            display_name: name.clone(),
        }))
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        notification: &ReminderNotification,
    ) -> Result<(), DispatchError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DispatchError("503 service unavailable".to_owned()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| DispatchError("poisoned".to_owned()))?;
        sent.push((channel.id.clone(), notification.clone()));
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, DispatchError> {
        Ok(true)
    }
}

/// [`LanguageModel`] returning scripted replies and recording prompts.
///
/// When the script runs out, every further call fails.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> crate::Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| crate::BotError::Llm("no scripted reply left".to_owned()))
    }
}

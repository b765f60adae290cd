use crate::channels::traits::{
    ChannelRef, DispatchError, Messenger, ReminderNotification, UserRef,
};
use crate::config::DiscordConfig;
use crate::scheduler::ack::AckAction;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

/// Embed colour for on-time reminders.
const REMINDER_COLOR: u32 = 0xff_99_00;
/// Embed colour for reminders replayed after downtime.
const OVERDUE_COLOR: u32 = 0xff_00_00;

/// Discord REST API client used for reminder delivery.
pub struct DiscordMessenger {
    bot_token: String,
    api_base_url: String,
    client: reqwest::Client,
}

impl DiscordMessenger {
    pub fn new(config: &DiscordConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| crate::BotError::Discord(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            bot_token: config.bot_token.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url)
    }

    /// GET a resource; `Ok(None)` when Discord says it is gone or hidden.
    async fn lookup(&self, path: &str) -> Result<Option<serde_json::Value>, DispatchError> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await
            .map_err(|e| DispatchError(format!("GET {path}: {e}")))?;

        let status = response.status();
        if is_permanent_lookup_failure(status) {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError(format!("GET {path} failed ({status}): {body}")));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| DispatchError(format!("GET {path}: bad body: {e}")))
    }

    fn message_payload(notification: &ReminderNotification) -> serde_json::Value {
        let color = if notification.overdue_by_secs.is_some() {
            OVERDUE_COLOR
        } else {
            REMINDER_COLOR
        };
        let id = &notification.reminder_id;
        json!({
            "content": notification.owner.mention(),
            "allowed_mentions": { "users": [notification.owner.id] },
            "embeds": [{
                "title": notification.title(),
                "description": notification.body(),
                "color": color,
                "footer": { "text": notification.footer() }
            }],
            "components": [{
                "type": 1,
                "components": [
                    {
                        "type": 2,
                        "style": 3,
                        "label": "Completed",
                        "custom_id": AckAction::Complete.custom_id(id)
                    },
                    {
                        "type": 2,
                        "style": 4,
                        "label": "Revoke",
                        "custom_id": AckAction::Revoke.custom_id(id)
                    }
                ]
            }]
        })
    }
}

/// 400 (malformed snowflake), 403 and 404 never heal on retry.
fn is_permanent_lookup_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl Messenger for DiscordMessenger {
    fn id(&self) -> &'static str {
        "discord"
    }

    async fn resolve_channel(&self, channel_id: &str) -> Result<Option<ChannelRef>, DispatchError> {
        let Some(body) = self.lookup(&format!("/channels/{channel_id}")).await? else {
            return Ok(None);
        };
        Ok(Some(ChannelRef {
            id: str_field(&body, "id").unwrap_or_else(|| channel_id.to_owned()),
            name: str_field(&body, "name"),
        }))
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserRef>, DispatchError> {
        let Some(body) = self.lookup(&format!("/users/{user_id}")).await? else {
            return Ok(None);
        };
        let display_name = str_field(&body, "global_name")
            .or_else(|| str_field(&body, "username"))
            .unwrap_or_else(|| user_id.to_owned());
        Ok(Some(UserRef {
            id: user_id.to_owned(),
            display_name,
        }))
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        notification: &ReminderNotification,
    ) -> Result<(), DispatchError> {
        let path = format!("/channels/{}/messages", channel.id);
        let response = self
            .client
            .post(self.url(&path))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&Self::message_payload(notification))
            .send()
            .await
            .map_err(|e| DispatchError(format!("POST {path}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError(format!("discord send failed ({status}): {body}")));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, DispatchError> {
        if self.bot_token.trim().is_empty() {
            return Ok(false);
        }
        let response = self
            .client
            .get(self.url("/users/@me"))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await
            .map_err(|e| DispatchError(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

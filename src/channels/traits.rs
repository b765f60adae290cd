use crate::error::ReminderError;
use crate::scheduler::time_expr::format_duration;
use async_trait::async_trait;

/// A channel the bot can post into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub name: Option<String>,
}

/// A user the bot can mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
}

impl UserRef {
    /// Discord mention markup for this user.
    #[must_use]
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// Temporary failure talking to the messaging service.
///
/// Permanent failures are not errors: lookups report them as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DispatchError(pub String);

impl From<DispatchError> for ReminderError {
    fn from(e: DispatchError) -> Self {
        ReminderError::TransientDispatch(e.0)
    }
}

/// Everything needed to render one reminder delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderNotification {
    pub reminder_id: String,
    pub owner: UserRef,
    pub message: String,
    pub interval_seconds: u64,
    /// Set when the delivery replays a cycle missed while offline.
    pub overdue_by_secs: Option<u64>,
}

impl ReminderNotification {
    #[must_use]
    pub fn title(&self) -> &'static str {
        if self.overdue_by_secs.is_some() {
            "Overdue Reminder"
        } else {
            "Reminder"
        }
    }

    /// Embed body: the message, the recurrence and, if late, by how much.
    #[must_use]
    pub fn body(&self) -> String {
        let mut body = format!(
            "{}\n\nRecurring every: {}",
            self.message,
            format_duration(self.interval_seconds)
        );
        if let Some(late) = self.overdue_by_secs {
            body.push_str(&format!(
                "\nOverdue by: {} (missed while offline)",
                format_duration(late)
            ));
        }
        body
    }

    #[must_use]
    pub fn footer(&self) -> String {
        format!("Reminder ID: {}", self.reminder_id)
    }
}

/// Outbound messaging port used by the reminder dispatcher.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Stable backend identifier (e.g. `discord`).
    fn id(&self) -> &'static str;

    /// Look up a channel; `Ok(None)` when it no longer exists or is not visible.
    async fn resolve_channel(&self, channel_id: &str) -> Result<Option<ChannelRef>, DispatchError>;

    /// Look up a user; `Ok(None)` when unknown.
    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserRef>, DispatchError>;

    /// Deliver a reminder with its acknowledgement controls.
    async fn send(
        &self,
        channel: &ChannelRef,
        notification: &ReminderNotification,
    ) -> Result<(), DispatchError>;

    /// Best-effort credentials probe.
    async fn health_check(&self) -> Result<bool, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(overdue: Option<u64>) -> ReminderNotification {
        ReminderNotification {
            reminder_id: "reminder_3".to_owned(),
            owner: UserRef {
                id: "42".to_owned(),
                display_name: "ada".to_owned(),
            },
            message: "drink water".to_owned(),
            interval_seconds: 5_400,
            overdue_by_secs: overdue,
        }
    }

    #[test]
    fn on_time_body_has_no_overdue_line() {
        let n = notification(None);
        assert_eq!(n.title(), "Reminder");
        assert_eq!(n.body(), "drink water\n\nRecurring every: 1h 30m");
        assert_eq!(n.footer(), "Reminder ID: reminder_3");
        assert_eq!(n.owner.mention(), "<@42>");
    }

    #[test]
    fn overdue_body_mentions_lateness() {
        let n = notification(Some(7_200));
        assert_eq!(n.title(), "Overdue Reminder");
        assert!(n.body().ends_with("Overdue by: 2h (missed while offline)"));
    }
}

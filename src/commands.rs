//! User-facing commands: reminders, memory and bot info.
//!
//! Every command produces a [`CommandReply`] meant to be shown only to the
//! invoking user. Validation problems are replies, not errors.

use crate::chat::{SharedMemory, lock_memory};
use crate::error::ReminderError;
use crate::scheduler::ack::{AckHandler, AckOutcome};
use crate::scheduler::reminder::Reminder;
use crate::scheduler::store::{self, SharedStore};
use crate::scheduler::time_expr::{format_duration, parse_interval};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Characters of a reminder message shown in the list view.
const LIST_PREVIEW_CHARS: usize = 100;

/// A command as received by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandRequest {
    Remind {
        user_id: String,
        channel_id: String,
        time_period: String,
        message: String,
    },
    Reminders {
        user_id: String,
    },
    Complete {
        user_id: String,
        reminder_id: String,
    },
    Revoke {
        user_id: String,
        reminder_id: String,
    },
    /// A press on a reminder's "Completed" or "Revoke" button.
    Button {
        user_id: String,
        custom_id: String,
    },
    Forget {
        user_id: String,
    },
    Memory {
        user_id: String,
    },
    Stats {
        #[serde(default)]
        server_count: Option<u64>,
    },
    Info,
}

/// Text answer to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub ok: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_id: Option<String>,
}

impl CommandReply {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
            reminder_id: None,
        }
    }

    fn rejected(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
            reminder_id: None,
        }
    }
}

/// A freshly created reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderCreated {
    pub id: String,
    pub interval_seconds: u64,
    pub first_due: DateTime<Utc>,
}

/// Executes commands against the reminder store and chat memory.
#[derive(Clone)]
pub struct CommandService {
    store: SharedStore,
    ack: AckHandler,
    memory: SharedMemory,
}

/// Discord relative timestamp markup.
fn relative_time(at: DateTime<Utc>) -> String {
    format!("<t:{}:R>", at.timestamp())
}

fn preview(message: &str) -> String {
    if message.chars().count() > LIST_PREVIEW_CHARS {
        let head: String = message.chars().take(LIST_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        message.to_owned()
    }
}

impl CommandService {
    pub fn new(store: SharedStore, memory: SharedMemory) -> Self {
        Self {
            ack: AckHandler::new(store.clone()),
            store,
            memory,
        }
    }

    /// Parse `time_period` and create a reminder.
    pub fn remind(
        &self,
        owner: &str,
        destination: &str,
        time_period: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<ReminderCreated> {
        let interval_seconds = parse_interval(time_period).ok_or_else(|| {
            ReminderError::Validation(
                "invalid time format; use combinations like 30s, 5m, 1h30m or 2d".to_owned(),
            )
        })?;
        let mut store = store::lock(&self.store)?;
        let id = store.create(owner, destination, message, interval_seconds, now)?;
        let first_due = store.get(&id).map_or(now, |r| r.next_due);
        info!(%id, owner, interval_seconds, "reminder set");
        Ok(ReminderCreated {
            id,
            interval_seconds,
            first_due,
        })
    }

    /// Reminders owned by `owner`.
    pub fn reminders(&self, owner: &str) -> crate::Result<Vec<Reminder>> {
        Ok(store::lock(&self.store)?.list_by_owner(owner))
    }

    /// Run a gateway command.
    pub fn execute(&self, request: CommandRequest, now: DateTime<Utc>) -> crate::Result<CommandReply> {
        match request {
            CommandRequest::Remind {
                user_id,
                channel_id,
                time_period,
                message,
            } => match self.remind(&user_id, &channel_id, &time_period, &message, now) {
                Ok(created) => Ok(CommandReply {
                    ok: true,
                    text: format!(
                        "Reminder set!\nMessage: {message}\nRecurring every: {}\nFirst reminder: {}",
                        format_duration(created.interval_seconds),
                        relative_time(created.first_due)
                    ),
                    reminder_id: Some(created.id),
                }),
                Err(crate::BotError::Reminder(ReminderError::Validation(reason))) => {
                    Ok(CommandReply::rejected(reason))
                }
                Err(e) => Err(e),
            },
            CommandRequest::Reminders { user_id } => self.render_list(&user_id),
            CommandRequest::Complete {
                user_id,
                reminder_id,
            } => {
                let outcome = self.ack.complete(&reminder_id, &user_id, now)?;
                Ok(Self::render_ack(outcome))
            }
            CommandRequest::Revoke {
                user_id,
                reminder_id,
            } => {
                let outcome = self.ack.revoke(&reminder_id, &user_id)?;
                Ok(Self::render_ack(outcome))
            }
            CommandRequest::Button { user_id, custom_id } => {
                match self.ack.handle_button(&custom_id, &user_id, now)? {
                    Some(outcome) => Ok(Self::render_ack(outcome)),
                    None => Ok(CommandReply::rejected("Unknown button.")),
                }
            }
            CommandRequest::Forget { user_id } => {
                if lock_memory(&self.memory)?.forget(&user_id) {
                    Ok(CommandReply::ok(
                        "Okay, I've cleared our chat history! Starting fresh.",
                    ))
                } else {
                    Ok(CommandReply::ok(
                        "We haven't chatted before, so there's nothing to forget!",
                    ))
                }
            }
            CommandRequest::Memory { user_id } => {
                match lock_memory(&self.memory)?.turn_count(&user_id) {
                    Some(count) => Ok(CommandReply::ok(format!(
                        "We've had {count} messages in our conversation!"
                    ))),
                    None => Ok(CommandReply::ok("We haven't started chatting yet!")),
                }
            }
            CommandRequest::Stats { server_count } => self.stats(server_count),
            CommandRequest::Info => Ok(CommandReply::ok(Self::info())),
        }
    }

    fn render_list(&self, owner: &str) -> crate::Result<CommandReply> {
        let mine = self.reminders(owner)?;
        if mine.is_empty() {
            return Ok(CommandReply::ok("You have no active reminders!"));
        }
        let mut text = String::from("Your active reminders:\n");
        for r in &mine {
            text.push_str(&format!(
                "\n{}\nMessage: {}\nInterval: {}\nNext: {}\n",
                r.id,
                preview(&r.message),
                format_duration(r.interval_seconds),
                relative_time(r.next_due)
            ));
        }
        text.push_str(&format!("\nTotal: {} reminder(s)", mine.len()));
        Ok(CommandReply::ok(text))
    }

    fn render_ack(outcome: AckOutcome) -> CommandReply {
        match outcome {
            AckOutcome::Completed {
                next_due,
                interval_seconds,
            } => CommandReply::ok(format!(
                "Marked as completed! Next reminder in {} ({}).",
                format_duration(interval_seconds),
                relative_time(next_due)
            )),
            AckOutcome::Revoked { message } => {
                CommandReply::ok(format!("Reminder revoked: {message}"))
            }
            AckOutcome::AlreadyGone => CommandReply::rejected("This reminder no longer exists."),
            AckOutcome::NotOwner => {
                CommandReply::rejected("This isn't your reminder to acknowledge.")
            }
        }
    }

    fn stats(&self, server_count: Option<u64>) -> crate::Result<CommandReply> {
        let memory = lock_memory(&self.memory)?.stats();
        let reminders = store::lock(&self.store)?.len();
        let mut text = format!(
            "Total users: {}\nTotal messages: {}\nActive reminders: {reminders}",
            memory.users, memory.turns
        );
        if let Some(servers) = server_count {
            text.push_str(&format!("\nServers: {servers}"));
        }
        Ok(CommandReply::ok(text))
    }

    fn info() -> &'static str {
        concat!(
            "Hey! I'm Nikki!\n",
            "I chat and remember our conversations. I answer everything in my main channel ",
            "and whenever you mention me elsewhere.\n\n",
            "Commands:\n",
            "/forget - clear our chat history\n",
            "/memory - see how many messages we've exchanged\n",
            "/info - this message\n",
            "/stats - bot statistics\n",
            "/remind - set a recurring reminder\n",
            "/reminders - list your active reminders"
        )
    }
}

//! The recurring reminder record and its persisted form.

use crate::error::ReminderError;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Shortest accepted recurrence period.
pub const MIN_INTERVAL_SECS: u64 = 30;

/// Longest accepted reminder text, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Prefix of every reminder identifier.
pub const ID_PREFIX: &str = "reminder_";

/// `9999-12-31T23:59:59Z`. Later instants serialize with a signed
/// extended year that RFC 3339 readers reject.
pub const LATEST_DUE_TIMESTAMP: i64 = 253_402_300_799;

/// A recurring reminder owned by one user and delivered to one channel.
///
/// The identifier is the key of the persisted map and is not repeated in
/// the record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    #[serde(skip_serializing)]
    pub id: String,
    pub owner: String,
    pub destination: String,
    pub message: String,
    pub interval_seconds: u64,
    pub next_due: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    /// Whether the reminder should fire at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due <= now
    }

    /// Whole seconds past `next_due`, zero when not yet due.
    #[must_use]
    pub fn overdue_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.next_due).num_seconds()).unwrap_or(0)
    }

    /// Decode one persisted record.
    ///
    /// Accepts both the current field names and the legacy ones
    /// (`user_id`, `channel_id`, `interval`, `next_reminder`).
    pub fn decode(id: &str, value: serde_json::Value) -> Result<Self, ReminderError> {
        let corrupt = |reason: String| ReminderError::CorruptRecord {
            id: id.to_owned(),
            reason,
        };

        let raw: RawReminder = serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;

        if raw.interval_seconds < MIN_INTERVAL_SECS {
            return Err(corrupt(format!(
                "interval {}s is below the {MIN_INTERVAL_SECS}s minimum",
                raw.interval_seconds
            )));
        }

        let next_due = parse_timestamp(&raw.next_due)
            .ok_or_else(|| corrupt(format!("bad next_due timestamp {:?}", raw.next_due)))?;
        let last_sent = match raw.last_sent.as_deref() {
            Some(text) => Some(
                parse_timestamp(text)
                    .ok_or_else(|| corrupt(format!("bad last_sent timestamp {text:?}")))?,
            ),
            None => None,
        };
        let created_at = match raw.created_at.as_deref() {
            Some(text) => parse_timestamp(text)
                .ok_or_else(|| corrupt(format!("bad created_at timestamp {text:?}")))?,
            None => next_due,
        };

        Ok(Self {
            id: id.to_owned(),
            owner: raw.owner.into_string(),
            destination: raw.destination.into_string(),
            message: raw.message,
            interval_seconds: raw.interval_seconds,
            next_due,
            last_sent,
            created_at,
        })
    }

    /// Encode the record body for the persisted map.
    pub fn encode(&self) -> Result<serde_json::Value, ReminderError> {
        serde_json::to_value(self).map_err(|e| ReminderError::Persistence(e.to_string()))
    }
}

/// Numeric suffix of a `reminder_<n>` identifier.
#[must_use]
pub fn id_number(id: &str) -> Option<u64> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

/// `now + seconds`, or `None` when the result falls after
/// [`LATEST_DUE_TIMESTAMP`].
#[must_use]
pub fn due_after(now: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(i64::try_from(seconds).ok()?)?;
    now.checked_add_signed(delta).filter(|due| due.timestamp() <= LATEST_DUE_TIMESTAMP)
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one read as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    // chrono's own form, which also covers `+YYYYYY` extended years.
    if let Ok(parsed) = text.parse::<DateTime<Utc>>() {
        return Some(parsed);
    }
    text.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

/// Serde adapter for timestamps that may be naive.
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {text:?}")))
}

#[derive(Deserialize)]
struct RawReminder {
    #[serde(alias = "user_id")]
    owner: Snowflake,
    #[serde(alias = "channel_id")]
    destination: Snowflake,
    message: String,
    #[serde(alias = "interval")]
    interval_seconds: u64,
    #[serde(alias = "next_reminder")]
    next_due: String,
    #[serde(default)]
    last_sent: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// Discord ids arrive as strings today and as integers in old files.
#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Text(String),
    Number(u64),
}

impl Snowflake {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

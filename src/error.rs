//! Error types for the bot.

/// Top-level error type for the companion bot.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scheduler error (loop wiring, shared state).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Reminder lifecycle error.
    #[error(transparent)]
    Reminder(#[from] ReminderError),

    /// Discord REST error.
    #[error("discord error: {0}")]
    Discord(String),

    /// Generative language API error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Conversation memory storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// HTTP gateway error.
    #[error("gateway error: {0}")]
    Gateway(String),
}

/// Failures in the reminder subsystem.
///
/// Only [`ReminderError::Validation`] is ever shown to a user. The other
/// variants drive the store's recovery policy and end up in logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReminderError {
    /// Interval or message rejected; the store was not touched.
    #[error("{0}")]
    Validation(String),

    /// The reminder no longer exists. Soft: only logged, callers see
    /// `AckOutcome::AlreadyGone` or a `None`/`false` return instead.
    #[error("reminder {0} not found")]
    NotFound(String),

    /// Destination channel or owner cannot be resolved any more.
    #[error("reminder {id} has an unresolvable destination: {reason}")]
    UnresolvableDestination {
        /// Reminder identifier.
        id: String,
        /// What failed to resolve.
        reason: String,
    },

    /// Temporary send failure; retried on the next tick.
    #[error("transient dispatch failure: {0}")]
    TransientDispatch(String),

    /// Persisted record could not be decoded.
    #[error("reminder {id} is corrupt: {reason}")]
    CorruptRecord {
        /// Reminder identifier.
        id: String,
        /// Decode failure.
        reason: String,
    },

    /// Durable write failed; in-memory state stays authoritative.
    #[error("cannot persist reminders: {0}")]
    Persistence(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;

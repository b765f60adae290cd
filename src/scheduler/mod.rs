//! Durable recurring reminders.
//!
//! The store persists reminders across restarts, the runner replays what
//! was missed while offline and then ticks on a fixed period, and the
//! dispatcher and acknowledgement handler are the only other writers.

pub mod ack;
pub mod dispatch;
pub mod reminder;
pub mod runner;
pub mod store;
pub mod time_expr;

pub use ack::{AckAction, AckHandler, AckOutcome};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use reminder::Reminder;
pub use runner::{CatchUpReport, Clock, ManualClock, ReminderScheduler, SystemClock, TickReport};
pub use store::{JsonFileSnapshots, MemorySnapshots, ReminderStore, SharedStore, SnapshotStore};
pub use time_expr::{format_duration, parse_interval};

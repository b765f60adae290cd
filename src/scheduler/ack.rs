//! Owner-only "completed" and "revoke" actions on a delivered reminder.

use crate::scheduler::store::{self, SharedStore};
use chrono::{DateTime, Utc};
use tracing::info;

/// Button id prefix for "completed".
pub const COMPLETE_PREFIX: &str = "reminder_completed";
/// Button id prefix for "revoke".
pub const REVOKE_PREFIX: &str = "reminder_revoke";

/// Which acknowledgement a button carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Complete,
    Revoke,
}

impl AckAction {
    /// Button custom id for `reminder_id`.
    #[must_use]
    pub fn custom_id(self, reminder_id: &str) -> String {
        let prefix = match self {
            Self::Complete => COMPLETE_PREFIX,
            Self::Revoke => REVOKE_PREFIX,
        };
        format!("{prefix}:{reminder_id}")
    }

    /// Split a button custom id into action and reminder id.
    #[must_use]
    pub fn parse_custom_id(custom_id: &str) -> Option<(Self, &str)> {
        let (prefix, id) = custom_id.split_once(':')?;
        let action = match prefix {
            COMPLETE_PREFIX => Self::Complete,
            REVOKE_PREFIX => Self::Revoke,
            _ => return None,
        };
        (!id.is_empty()).then_some((action, id))
    }
}

/// Result of an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Completed {
        next_due: DateTime<Utc>,
        interval_seconds: u64,
    },
    Revoked {
        message: String,
    },
    /// The reminder was already deleted.
    AlreadyGone,
    /// The actor does not own the reminder; nothing changed.
    NotOwner,
}

/// Applies acknowledgements to the shared store.
#[derive(Clone)]
pub struct AckHandler {
    store: SharedStore,
}

impl AckHandler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Restart the interval from `now`.
    pub fn complete(&self, id: &str, actor: &str, now: DateTime<Utc>) -> crate::Result<AckOutcome> {
        let mut store = store::lock(&self.store)?;
        let Some(reminder) = store.get(id) else {
            return Ok(AckOutcome::AlreadyGone);
        };
        if reminder.owner != actor {
            return Ok(AckOutcome::NotOwner);
        }
        let interval_seconds = reminder.interval_seconds;
        let Some(next_due) = store.complete_early(id, now) else {
            return Ok(AckOutcome::AlreadyGone);
        };
        info!(%id, %next_due, "reminder completed early");
        Ok(AckOutcome::Completed {
            next_due,
            interval_seconds,
        })
    }

    /// Delete the reminder.
    pub fn revoke(&self, id: &str, actor: &str) -> crate::Result<AckOutcome> {
        let mut store = store::lock(&self.store)?;
        match store.get(id) {
            None => return Ok(AckOutcome::AlreadyGone),
            Some(reminder) if reminder.owner != actor => return Ok(AckOutcome::NotOwner),
            Some(_) => {}
        }
        let Some(removed) = store.revoke(id) else {
            return Ok(AckOutcome::AlreadyGone);
        };
        info!(%id, "reminder revoked by owner");
        Ok(AckOutcome::Revoked {
            message: removed.message,
        })
    }

    /// Apply a button press identified by its custom id.
    ///
    /// Returns `None` for ids that are not reminder buttons.
    pub fn handle_button(
        &self,
        custom_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<Option<AckOutcome>> {
        let Some((action, id)) = AckAction::parse_custom_id(custom_id) else {
            return Ok(None);
        };
        let outcome = match action {
            AckAction::Complete => self.complete(id, actor, now)?,
            AckAction::Revoke => self.revoke(id, actor)?,
        };
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::store::{ReminderStore, shared};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (SharedStore, AckHandler, String) {
        let store = shared(ReminderStore::in_memory());
        let id = store
            .lock()
            .unwrap()
            .create("owner", "c1", "walk", 600, t0())
            .unwrap();
        (Arc::clone(&store), AckHandler::new(store), id)
    }

    #[test]
    fn owner_completion_restarts_interval() {
        let (store, ack, id) = setup();
        let now = t0() + Duration::seconds(120);

        let outcome = ack.complete(&id, "owner", now).unwrap();
        assert_eq!(
            outcome,
            AckOutcome::Completed {
                next_due: now + Duration::seconds(600),
                interval_seconds: 600,
            }
        );
        assert_eq!(
            store.lock().unwrap().get(&id).unwrap().next_due,
            now + Duration::seconds(600)
        );
    }

    #[test]
    fn non_owner_is_rejected_without_mutation() {
        let (store, ack, id) = setup();
        let before = store.lock().unwrap().get(&id).cloned();

        assert_eq!(ack.complete(&id, "intruder", t0()).unwrap(), AckOutcome::NotOwner);
        assert_eq!(ack.revoke(&id, "intruder").unwrap(), AckOutcome::NotOwner);
        assert_eq!(store.lock().unwrap().get(&id).cloned(), before);
    }

    #[test]
    fn revoke_then_ack_reports_gone() {
        let (store, ack, id) = setup();

        assert_eq!(
            ack.revoke(&id, "owner").unwrap(),
            AckOutcome::Revoked {
                message: "walk".to_owned()
            }
        );
        assert!(store.lock().unwrap().is_empty());
        assert_eq!(ack.revoke(&id, "owner").unwrap(), AckOutcome::AlreadyGone);
        assert_eq!(ack.complete(&id, "owner", t0()).unwrap(), AckOutcome::AlreadyGone);
    }

    #[test]
    fn custom_ids_round_trip() {
        let id = AckAction::Revoke.custom_id("reminder_7");
        assert_eq!(id, "reminder_revoke:reminder_7");
        assert_eq!(
            AckAction::parse_custom_id(&id),
            Some((AckAction::Revoke, "reminder_7"))
        );
        assert_eq!(AckAction::parse_custom_id("reminder_completed:"), None);
        assert_eq!(AckAction::parse_custom_id("poll_vote:reminder_7"), None);
        assert_eq!(AckAction::parse_custom_id("reminder_completed"), None);
    }

    #[test]
    fn button_dispatches_to_action() {
        let (_, ack, id) = setup();
        let custom = AckAction::Complete.custom_id(&id);

        let outcome = ack.handle_button(&custom, "owner", t0()).unwrap();
        assert!(matches!(outcome, Some(AckOutcome::Completed { .. })));
        assert_eq!(ack.handle_button("other:1", "owner", t0()).unwrap(), None);
    }
}

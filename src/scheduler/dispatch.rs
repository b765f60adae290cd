//! Delivery of a single reminder.

use crate::channels::traits::{Messenger, ReminderNotification};
use crate::error::ReminderError;
use crate::scheduler::reminder::Reminder;
use crate::scheduler::store::{self, SharedStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a reminder handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered and advanced.
    Sent,
    /// Destination or owner is gone; the reminder was deleted.
    Removed,
    /// Temporary failure; left untouched for the next tick.
    Deferred,
}

/// Resolves, sends and advances reminders.
#[derive(Clone)]
pub struct Dispatcher {
    store: SharedStore,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(store: SharedStore, messenger: Arc<dyn Messenger>) -> Self {
        Self { store, messenger }
    }

    /// Deliver `reminder` at `now`.
    ///
    /// The store lock is only taken after the network calls. If the
    /// reminder was revoked in the meantime the advance is a no-op.
    pub async fn dispatch(
        &self,
        reminder: &Reminder,
        overdue: bool,
        now: DateTime<Utc>,
    ) -> crate::Result<DispatchOutcome> {
        let channel = match self.messenger.resolve_channel(&reminder.destination).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                return self.remove(reminder, format!("channel {} not found", reminder.destination));
            }
            Err(e) => return Ok(self.defer(reminder, e.into())),
        };

        let owner = match self.messenger.resolve_user(&reminder.owner).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                return self.remove(reminder, format!("user {} not found", reminder.owner));
            }
            Err(e) => return Ok(self.defer(reminder, e.into())),
        };

        let notification = ReminderNotification {
            reminder_id: reminder.id.clone(),
            owner,
            message: reminder.message.clone(),
            interval_seconds: reminder.interval_seconds,
            overdue_by_secs: overdue.then(|| reminder.overdue_secs(now)),
        };

        if let Err(e) = self.messenger.send(&channel, &notification).await {
            return Ok(self.defer(reminder, e.into()));
        }

        if !store::lock(&self.store)?.advance(&reminder.id, now) {
            let missing = ReminderError::NotFound(reminder.id.clone());
            debug!(error = %missing, "reminder revoked while being sent");
        }
        debug!(
            id = %reminder.id,
            channel = %channel.id,
            overdue,
            backend = self.messenger.id(),
            "reminder sent"
        );
        Ok(DispatchOutcome::Sent)
    }

    fn remove(&self, reminder: &Reminder, reason: String) -> crate::Result<DispatchOutcome> {
        let error = ReminderError::UnresolvableDestination {
            id: reminder.id.clone(),
            reason,
        };
        store::lock(&self.store)?.revoke(&reminder.id);
        warn!(%error, "reminder deleted");
        Ok(DispatchOutcome::Removed)
    }

    fn defer(&self, reminder: &Reminder, error: ReminderError) -> DispatchOutcome {
        warn!(id = %reminder.id, %error, "reminder deferred to next tick");
        DispatchOutcome::Deferred
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::store::{ReminderStore, shared};
    use crate::test_utils::RecordingMessenger;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (SharedStore, Arc<RecordingMessenger>, Dispatcher, Reminder) {
        let store = shared(ReminderStore::in_memory());
        let id = store
            .lock()
            .unwrap()
            .create("u1", "c1", "stretch", 60, t0())
            .unwrap();
        let reminder = store.lock().unwrap().get(&id).cloned().unwrap();
        let messenger = Arc::new(
            RecordingMessenger::new()
                .with_channel("c1")
                .with_user("u1", "ada"),
        );
        let dispatcher = Dispatcher::new(Arc::clone(&store), messenger.clone());
        (store, messenger, dispatcher, reminder)
    }

    #[tokio::test]
    async fn sent_reminder_is_advanced() {
        let (store, messenger, dispatcher, reminder) = setup();
        let now = t0() + Duration::seconds(61);

        let outcome = dispatcher.dispatch(&reminder, false, now).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Sent);

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "c1");
        assert_eq!(sent[0].1.owner.display_name, "ada");
        assert_eq!(sent[0].1.overdue_by_secs, None);

        let stored = store.lock().unwrap().get(&reminder.id).cloned().unwrap();
        assert_eq!(stored.last_sent, Some(now));
        assert_eq!(stored.next_due, now + Duration::seconds(60));
    }

    #[tokio::test]
    async fn overdue_flag_carries_lateness() {
        let (_, messenger, dispatcher, reminder) = setup();
        let now = reminder.next_due + Duration::hours(2);

        dispatcher.dispatch(&reminder, true, now).await.unwrap();
        assert_eq!(messenger.sent()[0].1.overdue_by_secs, Some(7_200));
    }

    #[tokio::test]
    async fn missing_channel_removes_without_advancing() {
        let (store, messenger, dispatcher, reminder) = setup();
        messenger.remove_channel("c1");

        let outcome = dispatcher.dispatch(&reminder, false, t0()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Removed);
        assert!(store.lock().unwrap().get(&reminder.id).is_none());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_owner_removes() {
        let (store, _, _, reminder) = setup();
        let stranger = Arc::new(RecordingMessenger::new().with_channel("c1"));
        let dispatcher = Dispatcher::new(Arc::clone(&store), stranger);

        let outcome = dispatcher.dispatch(&reminder, false, t0()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Removed);
        assert!(store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_leave_reminder_untouched() {
        let (store, messenger, dispatcher, reminder) = setup();

        messenger.set_fail_sends(true);
        let outcome = dispatcher.dispatch(&reminder, false, t0()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);

        messenger.set_fail_sends(false);
        messenger.set_fail_lookups(true);
        let outcome = dispatcher.dispatch(&reminder, false, t0()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);

        assert_eq!(store.lock().unwrap().get(&reminder.id), Some(&reminder));
    }

    #[tokio::test]
    async fn revoked_during_send_is_not_resurrected() {
        let (store, _, dispatcher, reminder) = setup();
        store.lock().unwrap().revoke(&reminder.id);

        let outcome = dispatcher.dispatch(&reminder, false, t0()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert!(store.lock().unwrap().is_empty());
        assert_eq!(
            ReminderError::NotFound(reminder.id.clone()).to_string(),
            format!("reminder {} not found", reminder.id)
        );
    }
}

//! Reminder scheduler background loop.
//!
//! Spawns a tokio task that first replays reminders missed while the
//! process was down, then scans the store once per tick and dispatches
//! whatever is due.

use crate::channels::traits::Messenger;
use crate::config::ReminderConfig;
use crate::scheduler::dispatch::{DispatchOutcome, Dispatcher};
use crate::scheduler::store::{self, SharedStore};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default interval between scheduler ticks (seconds).
pub const TICK_INTERVAL_SECS: u64 = 30;

/// Default pause between two dispatches in the same tick.
pub const DISPATCH_DELAY_MS: u64 = 500;

/// Source of "now" for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now())
    }
}

/// Counts from one pass over the due reminders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub removed: usize,
    pub deferred: usize,
    /// Dispatches that hit an internal error (logged).
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Removed => self.removed += 1,
            DispatchOutcome::Deferred => self.deferred += 1,
        }
    }
}

/// Result of the startup catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Corrupt records deleted.
    pub purged: usize,
    /// Overdue reminders handled.
    pub dispatch: TickReport,
}

/// Periodic reminder dispatcher.
pub struct ReminderScheduler {
    store: SharedStore,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    dispatch_delay: Duration,
    cancel: CancellationToken,
}

impl ReminderScheduler {
    /// Create a scheduler with the default tick and pacing.
    pub fn new(store: SharedStore, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&store), messenger),
            store,
            clock: Arc::new(SystemClock),
            tick_interval: Duration::from_secs(TICK_INTERVAL_SECS),
            dispatch_delay: Duration::from_millis(DISPATCH_DELAY_MS),
            cancel: CancellationToken::new(),
        }
    }

    /// Apply tick and pacing settings from config.
    #[must_use]
    pub fn with_config(mut self, config: &ReminderConfig) -> Self {
        self.tick_interval = Duration::from_secs(config.tick_interval_secs.max(1));
        self.dispatch_delay = Duration::from_millis(config.dispatch_delay_ms);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Token that stops the loop when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replay reminders that fell due while the process was down.
    ///
    /// Corrupt records are purged first. Each overdue reminder is sent once
    /// however many cycles were missed, and its next run counts from now.
    pub async fn catch_up(&self) -> crate::Result<CatchUpReport> {
        let purged = store::lock(&self.store)?.purge_corrupt();
        for error in &purged {
            warn!(%error, "dropped corrupt reminder");
        }

        let now = self.clock.now();
        let dispatch = self.dispatch_due(now, true).await?;
        let report = CatchUpReport {
            purged: purged.len(),
            dispatch,
        };
        info!(
            purged = report.purged,
            overdue = dispatch.due,
            sent = dispatch.sent,
            removed = dispatch.removed,
            deferred = dispatch.deferred,
            "reminder catch-up complete"
        );
        Ok(report)
    }

    /// Dispatch everything due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> crate::Result<TickReport> {
        self.dispatch_due(now, false).await
    }

    async fn dispatch_due(&self, now: DateTime<Utc>, overdue: bool) -> crate::Result<TickReport> {
        let due = store::lock(&self.store)?.get_due(now);
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for (index, candidate) in due.iter().enumerate() {
            if index > 0 && !self.dispatch_delay.is_zero() {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.dispatch_delay) => {}
                }
            } else if self.cancel.is_cancelled() {
                break;
            }

            // Acknowledged or revoked since the scan.
            let current = store::lock(&self.store)?
                .get(&candidate.id)
                .filter(|r| r.is_due(now))
                .cloned();
            let Some(reminder) = current else {
                debug!(id = %candidate.id, "reminder no longer due; skipping");
                continue;
            };

            match self.dispatcher.dispatch(&reminder, overdue, now).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    error!(id = %reminder.id, error = %e, "reminder dispatch failed");
                }
            }
        }

        Ok(report)
    }

    /// Start the loop: catch-up once, then tick until cancelled.
    pub fn run(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tick_secs = self.tick_interval.as_secs(),
                "reminder scheduler started"
            );
            if let Err(e) = self.catch_up().await {
                error!(error = %e, "reminder catch-up failed");
            }

            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; catch-up already covered it.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let now = self.clock.now();
                match self.tick(now).await {
                    Ok(report) if report.due > 0 => debug!(?report, "reminder tick"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "reminder tick failed"),
                }
            }
            info!("reminder scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::store::{MemorySnapshots, ReminderStore, shared};
    use crate::test_utils::RecordingMessenger;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn messenger() -> Arc<RecordingMessenger> {
        Arc::new(
            RecordingMessenger::new()
                .with_channel("c1")
                .with_user("u1", "ada"),
        )
    }

    fn scheduler(store: &SharedStore, messenger: &Arc<RecordingMessenger>) -> ReminderScheduler {
        ReminderScheduler::new(Arc::clone(store), messenger.clone())
            .with_dispatch_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn due_reminder_is_dispatched_once_across_two_ticks() {
        let store = shared(ReminderStore::in_memory());
        let id = store.lock().unwrap().create("u1", "c1", "a", 60, t0()).unwrap();
        let messenger = messenger();
        let scheduler = scheduler(&store, &messenger);

        let first = t0() + chrono::Duration::seconds(60);
        let report = scheduler.tick(first).await.unwrap();
        assert_eq!(report.sent, 1);

        // Advanced to first + 60s, so the next tick 30s later finds nothing.
        let report = scheduler.tick(first + chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(messenger.sent().len(), 1);
        assert_eq!(
            store.lock().unwrap().get(&id).unwrap().next_due,
            first + chrono::Duration::seconds(60)
        );
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_tick() {
        let store = shared(ReminderStore::in_memory());
        {
            let mut s = store.lock().unwrap();
            s.create("u1", "gone", "a", 60, t0()).unwrap();
            s.create("u1", "c1", "b", 60, t0()).unwrap();
        }
        let messenger = messenger();
        let scheduler = scheduler(&store, &messenger);

        let report = scheduler.tick(t0() + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(store.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn catch_up_sends_overdue_once_and_restarts_from_now() {
        let store = shared(ReminderStore::in_memory());
        let id = store.lock().unwrap().create("u1", "c1", "a", 600, t0()).unwrap();
        let messenger = messenger();
        let restart = t0() + chrono::Duration::seconds(600) + chrono::Duration::hours(2);
        let clock = Arc::new(ManualClock::new(restart));
        let scheduler = scheduler(&store, &messenger).with_clock(clock);

        let report = scheduler.catch_up().await.unwrap();
        assert_eq!(report.dispatch.sent, 1);

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.overdue_by_secs, Some(7_200));
        assert_eq!(
            store.lock().unwrap().get(&id).unwrap().next_due,
            restart + chrono::Duration::seconds(600)
        );
    }

    #[tokio::test]
    async fn catch_up_purges_corrupt_records() {
        let port = MemorySnapshots::with_json(
            r#"{"reminders":{"reminder_1":{"owner":"u1","destination":"c1",
                "message":"x","interval_seconds":60,"next_due":"garbage"}},"counter":1}"#,
        );
        let store = shared(ReminderStore::open(port).unwrap());
        let messenger = messenger();
        let scheduler = scheduler(&store, &messenger).with_clock(Arc::new(ManualClock::new(t0())));

        let report = scheduler.catch_up().await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(report.dispatch.due, 0);
        assert!(store.lock().unwrap().corrupt_ids().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = shared(ReminderStore::in_memory());
        let messenger = messenger();
        let scheduler = scheduler(&store, &messenger).with_tick_interval(Duration::from_millis(10));
        let cancel = scheduler.cancellation_token();

        let handle = scheduler.run();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(joined.is_ok(), "scheduler did not stop");
    }

    #[tokio::test]
    async fn cancelled_scheduler_stops_between_dispatches() {
        let store = shared(ReminderStore::in_memory());
        {
            let mut s = store.lock().unwrap();
            s.create("u1", "c1", "a", 60, t0()).unwrap();
            s.create("u1", "c1", "b", 60, t0()).unwrap();
        }
        let messenger = messenger();
        let scheduler = ReminderScheduler::new(Arc::clone(&store), messenger.clone())
            .with_dispatch_delay(Duration::from_secs(60));
        scheduler.cancellation_token().cancel();

        let report = scheduler.tick(t0() + chrono::Duration::minutes(2)).await.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.sent, 0);
    }
}

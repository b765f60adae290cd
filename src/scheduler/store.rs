//! Reminder store and its persistence port.
//!
//! The store owns the in-memory collection and writes the full snapshot
//! after every mutation. Write failures are logged; the in-memory state
//! stays authoritative.

use crate::error::ReminderError;
use crate::scheduler::reminder::{
    self, ID_PREFIX, MAX_MESSAGE_CHARS, MIN_INTERVAL_SECS, Reminder,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Store shared between the scheduler and command handlers.
pub type SharedStore = Arc<Mutex<ReminderStore>>;

/// Wrap a store for sharing.
#[must_use]
pub fn shared(store: ReminderStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock a shared store, mapping poisoning to a scheduler error.
pub fn lock(store: &SharedStore) -> crate::Result<MutexGuard<'_, ReminderStore>> {
    store
        .lock()
        .map_err(|_| crate::BotError::Scheduler("reminder store lock poisoned".to_owned()))
}

/// Persisted layout: `{ "reminders": { id: record }, "counter": n }`.
///
/// Records stay as raw JSON here so that one bad record does not make the
/// whole file unreadable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub reminders: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub counter: u64,
}

/// Durable storage for the reminder snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Read the last snapshot, `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<PersistedState>, ReminderError>;

    /// Replace the stored snapshot.
    fn save(&self, state: &PersistedState) -> Result<(), ReminderError>;
}

/// Pretty-printed JSON file, replaced atomically via a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshots {
    path: PathBuf,
}

impl JsonFileSnapshots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "reminders.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileSnapshots {
    fn load(&self) -> Result<Option<PersistedState>, ReminderError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ReminderError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            ReminderError::Persistence(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, state: &PersistedState) -> Result<(), ReminderError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReminderError::Persistence(format!("cannot create state dir: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ReminderError::Persistence(format!("cannot serialize state: {e}")))?;

        let tmp = self.temp_path();
        std::fs::write(&tmp, json)
            .map_err(|e| ReminderError::Persistence(format!("cannot write state: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ReminderError::Persistence(format!("cannot replace state: {e}")))
    }
}

/// Snapshot kept as JSON text in memory.
///
/// Goes through the same serde path as the file store. Writes can be made
/// to fail on demand.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    json: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    saves: AtomicU64,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing snapshot text.
    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            json: Mutex::new(Some(json.into())),
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current snapshot text.
    pub fn json(&self) -> Option<String> {
        self.json.lock().ok().and_then(|guard| guard.clone())
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for MemorySnapshots {
    fn load(&self) -> Result<Option<PersistedState>, ReminderError> {
        let Some(text) = self.json() else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ReminderError::Persistence(format!("cannot parse snapshot: {e}")))
    }

    fn save(&self, state: &PersistedState) -> Result<(), ReminderError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReminderError::Persistence("write refused".to_owned()));
        }
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| ReminderError::Persistence(e.to_string()))?;
        let mut guard = self
            .json
            .lock()
            .map_err(|_| ReminderError::Persistence("snapshot lock poisoned".to_owned()))?;
        *guard = Some(text);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn load(&self) -> Result<Option<PersistedState>, ReminderError> {
        (**self).load()
    }

    fn save(&self, state: &PersistedState) -> Result<(), ReminderError> {
        (**self).save(state)
    }
}

/// A record that failed to decode at load time.
#[derive(Debug, Clone)]
struct Quarantined {
    id: String,
    raw: serde_json::Value,
    error: ReminderError,
}

/// The set of active reminders plus the id counter.
pub struct ReminderStore {
    reminders: Vec<Reminder>,
    counter: u64,
    quarantined: Vec<Quarantined>,
    port: Box<dyn SnapshotStore>,
    persist_failures: u64,
}

impl ReminderStore {
    /// Load the store from `port`.
    ///
    /// Records that fail to decode are held back until [`purge_corrupt`]
    /// and are invisible to every read. An unreadable snapshot as a whole
    /// is an error so that it is never silently overwritten.
    ///
    /// [`purge_corrupt`]: Self::purge_corrupt
    pub fn open(port: impl SnapshotStore + 'static) -> Result<Self, ReminderError> {
        let state = port.load()?.unwrap_or_default();
        let mut reminders = Vec::with_capacity(state.reminders.len());
        let mut quarantined = Vec::new();
        let mut counter = state.counter;

        for (id, raw) in state.reminders {
            if let Some(n) = reminder::id_number(&id) {
                counter = counter.max(n);
            }
            match Reminder::decode(&id, raw.clone()) {
                Ok(decoded) => reminders.push(decoded),
                Err(error) => {
                    warn!(%error, "quarantining reminder record");
                    quarantined.push(Quarantined { id, raw, error });
                }
            }
        }

        info!(
            reminders = reminders.len(),
            corrupt = quarantined.len(),
            counter,
            "reminder store loaded"
        );

        Ok(Self {
            reminders,
            counter,
            quarantined,
            port: Box::new(port),
            persist_failures: 0,
        })
    }

    /// Empty store backed by [`MemorySnapshots`].
    pub fn in_memory() -> Self {
        Self {
            reminders: Vec::new(),
            counter: 0,
            quarantined: Vec::new(),
            port: Box::new(MemorySnapshots::new()),
            persist_failures: 0,
        }
    }

    /// Validate and add a reminder, returning its id.
    pub fn create(
        &mut self,
        owner: &str,
        destination: &str,
        message: &str,
        interval_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<String, ReminderError> {
        if interval_seconds < MIN_INTERVAL_SECS {
            return Err(ReminderError::Validation(format!(
                "interval must be at least {MIN_INTERVAL_SECS} seconds"
            )));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ReminderError::Validation(format!(
                "reminder message is too long (maximum {MAX_MESSAGE_CHARS} characters)"
            )));
        }
        let next_due = reminder::due_after(now, interval_seconds)
            .ok_or_else(|| ReminderError::Validation("interval is too long".to_owned()))?;

        self.counter = self.counter.saturating_add(1);
        let id = format!("{ID_PREFIX}{}", self.counter);
        self.reminders.push(Reminder {
            id: id.clone(),
            owner: owner.to_owned(),
            destination: destination.to_owned(),
            message: message.to_owned(),
            interval_seconds,
            next_due,
            last_sent: None,
            created_at: now,
        });
        debug!(%id, owner, interval_seconds, "reminder created");
        self.persist();
        Ok(id)
    }

    /// Reminders with `next_due <= now`, in insertion order.
    #[must_use]
    pub fn get_due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        self.reminders
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect()
    }

    /// Record a send at `now` and schedule the next one. No-op when absent.
    pub fn advance(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(reminder) = self.reminders.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        reminder.last_sent = Some(now);
        reminder.next_due = next_due_from(now, reminder.interval_seconds);
        self.persist();
        true
    }

    /// Restart the interval from `now` without recording a send.
    ///
    /// Returns the new `next_due`, or `None` when the reminder is gone.
    pub fn complete_early(&mut self, id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let reminder = self.reminders.iter_mut().find(|r| r.id == id)?;
        reminder.next_due = next_due_from(now, reminder.interval_seconds);
        let next_due = reminder.next_due;
        self.persist();
        Some(next_due)
    }

    /// Delete a reminder. Idempotent; returns the removed record.
    pub fn revoke(&mut self, id: &str) -> Option<Reminder> {
        let index = self.reminders.iter().position(|r| r.id == id)?;
        let removed = self.reminders.remove(index);
        self.persist();
        Some(removed)
    }

    /// Reminders owned by `owner`, in insertion order.
    #[must_use]
    pub fn list_by_owner(&self, owner: &str) -> Vec<Reminder> {
        self.reminders
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Reminder> {
        self.reminders.iter().find(|r| r.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    /// Highest id number handed out so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Ids of records still held in quarantine.
    #[must_use]
    pub fn corrupt_ids(&self) -> Vec<String> {
        self.quarantined.iter().map(|q| q.id.clone()).collect()
    }

    /// Number of snapshot writes that failed since load.
    #[must_use]
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures
    }

    /// Drop every quarantined record and persist.
    ///
    /// Returns one [`ReminderError::CorruptRecord`] per dropped record.
    pub fn purge_corrupt(&mut self) -> Vec<ReminderError> {
        if self.quarantined.is_empty() {
            return Vec::new();
        }
        let purged: Vec<ReminderError> = self.quarantined.drain(..).map(|q| q.error).collect();
        self.persist();
        purged
    }

    fn snapshot(&self) -> Result<PersistedState, ReminderError> {
        let mut reminders = serde_json::Map::new();
        for reminder in &self.reminders {
            reminders.insert(reminder.id.clone(), reminder.encode()?);
        }
        for q in &self.quarantined {
            reminders.insert(q.id.clone(), q.raw.clone());
        }
        Ok(PersistedState {
            reminders,
            counter: self.counter,
        })
    }

    fn persist(&mut self) {
        if let Err(e) = self.snapshot().and_then(|state| self.port.save(&state)) {
            self.persist_failures = self.persist_failures.saturating_add(1);
            error!(error = %e, "reminder snapshot not saved; keeping in-memory state");
        }
    }
}

fn next_due_from(now: DateTime<Utc>, interval_seconds: u64) -> DateTime<Utc> {
    reminder::due_after(now, interval_seconds)
        .or_else(|| DateTime::from_timestamp(reminder::LATEST_DUE_TIMESTAMP, 0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn memory_store() -> (Arc<MemorySnapshots>, ReminderStore) {
        let port = Arc::new(MemorySnapshots::new());
        let store = ReminderStore::open(Arc::clone(&port)).unwrap();
        (port, store)
    }

    #[test]
    fn create_assigns_sequential_ids_and_due_time() {
        let (port, mut store) = memory_store();
        let first = store.create("u1", "c1", "stand up", 3600, t0()).unwrap();
        let second = store.create("u1", "c1", "drink", 60, t0()).unwrap();

        assert_eq!(first, "reminder_1");
        assert_eq!(second, "reminder_2");
        assert_eq!(store.len(), 2);
        assert_eq!(store.counter(), 2);
        let r = store.get(&first).unwrap();
        assert_eq!(r.next_due, r.created_at + Duration::seconds(3600));
        assert_eq!(port.save_count(), 2);
    }

    #[test]
    fn short_interval_is_rejected_without_mutation() {
        let (port, mut store) = memory_store();
        let err = store.create("u1", "c1", "x", 29, t0()).unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));
        assert!(store.is_empty());
        assert_eq!(store.counter(), 0);
        assert_eq!(port.save_count(), 0);
    }

    #[test]
    fn message_limit_counts_characters() {
        let (_, mut store) = memory_store();
        let at_limit = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(store.create("u1", "c1", &at_limit, 30, t0()).is_ok());

        let too_long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        let err = store.create("u1", "c1", &too_long, 30, t0()).unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_due_keeps_insertion_order() {
        let (_, mut store) = memory_store();
        let a = store.create("u1", "c1", "a", 120, t0()).unwrap();
        let b = store.create("u2", "c1", "b", 60, t0()).unwrap();
        store.create("u3", "c1", "c", 600, t0()).unwrap();

        let due: Vec<String> = store
            .get_due(t0() + Duration::seconds(200))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(due, vec![a, b]);
    }

    #[test]
    fn advance_sets_last_sent_and_restarts_interval() {
        let (_, mut store) = memory_store();
        let id = store.create("u1", "c1", "a", 60, t0()).unwrap();
        let later = t0() + Duration::seconds(75);

        assert!(store.advance(&id, later));
        let r = store.get(&id).unwrap();
        assert_eq!(r.last_sent, Some(later));
        assert_eq!(r.next_due, later + Duration::seconds(60));
        assert!(!store.advance("reminder_99", later));
    }

    #[test]
    fn complete_early_does_not_record_a_send() {
        let (_, mut store) = memory_store();
        let id = store.create("u1", "c1", "a", 600, t0()).unwrap();
        let ack = t0() + Duration::seconds(100);

        assert_eq!(store.complete_early(&id, ack), Some(ack + Duration::seconds(600)));
        assert!(store.get(&id).unwrap().last_sent.is_none());
        assert_eq!(store.complete_early("reminder_99", ack), None);
    }

    #[test]
    fn revoke_is_idempotent() {
        let (_, mut store) = memory_store();
        let id = store.create("u1", "c1", "a", 60, t0()).unwrap();
        assert!(store.revoke(&id).is_some());
        assert!(store.revoke(&id).is_none());
        assert!(store.is_empty());
        assert_eq!(store.counter(), 1);
    }

    #[test]
    fn ids_are_not_reused_after_revoke() {
        let (_, mut store) = memory_store();
        let id = store.create("u1", "c1", "a", 60, t0()).unwrap();
        store.revoke(&id);
        assert_eq!(store.create("u1", "c1", "b", 60, t0()).unwrap(), "reminder_2");
    }

    #[test]
    fn list_by_owner_filters() {
        let (_, mut store) = memory_store();
        store.create("u1", "c1", "a", 60, t0()).unwrap();
        store.create("u2", "c1", "b", 60, t0()).unwrap();
        store.create("u1", "c2", "c", 60, t0()).unwrap();

        let mine: Vec<String> = store.list_by_owner("u1").into_iter().map(|r| r.message).collect();
        assert_eq!(mine, vec!["a", "c"]);
        assert!(store.list_by_owner("u9").is_empty());
    }

    #[test]
    fn snapshot_round_trip_preserves_order_and_counter() {
        let (port, mut store) = memory_store();
        for (i, msg) in ["z", "a", "m"].iter().enumerate() {
            store.create(&format!("u{i}"), "c1", msg, 60, t0()).unwrap();
        }
        store.revoke("reminder_2");

        let reopened = ReminderStore::open(Arc::clone(&port)).unwrap();
        assert_eq!(reopened.counter(), 3);
        let ids: Vec<String> = reopened.get_due(t0() + Duration::hours(1)).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["reminder_1", "reminder_3"]);
        assert_eq!(reopened.get("reminder_1"), store.get("reminder_1"));
    }

    #[test]
    fn counter_never_below_highest_loaded_id() {
        let port = MemorySnapshots::with_json(
            r#"{"reminders":{"reminder_12":{"owner":"1","destination":"2","message":"x",
                "interval_seconds":60,"next_due":"2024-05-01T09:00:00Z",
                "created_at":"2024-05-01T08:00:00Z"}},"counter":3}"#,
        );
        let mut store = ReminderStore::open(port).unwrap();
        assert_eq!(store.counter(), 12);
        assert_eq!(store.create("1", "2", "y", 60, t0()).unwrap(), "reminder_13");
    }

    #[test]
    fn corrupt_records_are_hidden_until_purged() {
        let port = Arc::new(MemorySnapshots::with_json(
            r#"{"reminders":{
                "reminder_1":{"owner":"1","destination":"2","message":"ok",
                    "interval_seconds":60,"next_due":"2024-05-01T09:00:00Z",
                    "created_at":"2024-05-01T08:00:00Z"},
                "reminder_2":{"owner":"1","destination":"2","message":"bad",
                    "interval_seconds":60,"next_due":"not a time"}
            },"counter":2}"#,
        ));
        let mut store = ReminderStore::open(Arc::clone(&port)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("reminder_2").is_none());
        assert_eq!(store.corrupt_ids(), vec!["reminder_2"]);

        // A mutation before the purge keeps the raw record on disk.
        store.advance("reminder_1", t0());
        assert!(port.json().unwrap().contains("not a time"));

        let purged = store.purge_corrupt();
        assert_eq!(purged.len(), 1);
        assert!(store.corrupt_ids().is_empty());
        assert!(!port.json().unwrap().contains("reminder_2"));
        assert!(store.purge_corrupt().is_empty());
    }

    #[test]
    fn persistence_failure_keeps_in_memory_mutation() {
        let (port, mut store) = memory_store();
        port.set_fail_writes(true);

        let id = store.create("u1", "c1", "a", 60, t0()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.persist_failures(), 1);
        assert!(port.json().is_none());

        port.set_fail_writes(false);
        store.advance(&id, t0());
        assert!(port.json().unwrap().contains(&id));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reminders.json");

        let mut store = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();
        assert!(store.is_empty());
        let id = store.create("u1", "c1", "water", 1800, t0()).unwrap();
        assert!(path.is_file());
        assert!(!path.with_file_name("reminders.json.tmp").exists());

        let reopened = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();
        assert_eq!(reopened.get(&id), store.get(&id));
        assert_eq!(reopened.counter(), 1);
    }

    #[test]
    fn far_future_due_times_survive_reload() {
        use crate::scheduler::time_expr::parse_interval;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.json");
        let mut store = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();

        let too_long = parse_interval("9999999d").unwrap();
        let err = store.create("u1", "c1", "never", too_long, t0()).unwrap_err();
        assert!(matches!(err, ReminderError::Validation(_)));
        assert!(store.is_empty());

        let id = store
            .create("u1", "c1", "someday", parse_interval("2900000d").unwrap(), t0())
            .unwrap();
        let reopened = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();
        assert!(reopened.corrupt_ids().is_empty());
        assert_eq!(reopened.get(&id), store.get(&id));

        // Restarting the interval decades later clamps to the last
        // representable due time instead of overflowing it.
        let later = t0() + Duration::days(365 * 50);
        let next_due = store.complete_early(&id, later).unwrap();
        assert_eq!(next_due.timestamp(), reminder::LATEST_DUE_TIMESTAMP);
        let reopened = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();
        assert!(reopened.corrupt_ids().is_empty());
        assert_eq!(reopened.get(&id).unwrap().next_due, next_due);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ReminderStore::open(JsonFileSnapshots::new(&path)).err().unwrap();
        assert!(matches!(err, ReminderError::Persistence(_)));
    }

    #[test]
    fn legacy_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.json");
        std::fs::write(
            &path,
            r#"{"reminders":{"reminder_5":{"user_id":111,"channel_id":222,
                "message":"old","interval":3600,
                "next_reminder":"2024-05-01T10:00:00.123456",
                "created_at":"2024-05-01T09:00:00.123456"}},"counter":5}"#,
        )
        .unwrap();

        let store = ReminderStore::open(JsonFileSnapshots::new(&path)).unwrap();
        let r = store.get("reminder_5").unwrap();
        assert_eq!(r.owner, "111");
        assert_eq!(r.interval_seconds, 3600);
        assert_eq!(store.list_by_owner("111").len(), 1);
    }
}

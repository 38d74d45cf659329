use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use storage::{KeyValueStore, PersistedSnapshot, DEFAULT_STORAGE_KEY};
use tokio::{
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::form::{FormChange, FormModel};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    pub storage_key: String,
    pub debounce: Duration,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// What `initialize` did with the stored snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Fields whose live value was already set and therefore won.
    pub kept_live: Vec<String>,
    /// Snapshot fields outside the form schema or holding non-scalar values.
    pub ignored: Vec<String>,
    pub snapshot_written_at: Option<DateTime<Utc>>,
    pub corrupt: bool,
}

impl RestoreReport {
    pub fn restored_anything(&self) -> bool {
        !self.restored.is_empty()
    }
}

#[derive(Default)]
struct FlushState {
    /// Serialized record of the last successful write.
    last_written: Option<String>,
    pending: Option<String>,
    /// Bumped whenever the pending flush is replaced or cancelled so a
    /// superseded timer that already woke up cannot write.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    /// Highest form revision already accounted for. Changes at or below it
    /// are stale notifications and are dropped.
    seen_revision: u64,
}

impl FlushState {
    fn observe_revision(&mut self, revision: u64) {
        self.seen_revision = self.seen_revision.max(revision);
    }

    fn cancel_pending(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Keeps a durable, debounced copy of a live form in a client-local store.
///
/// Storage failures never reach the caller: every operation logs and
/// carries on without durability.
#[derive(Clone)]
pub struct PersistenceController {
    form: Arc<dyn FormModel>,
    store: Arc<dyn KeyValueStore>,
    options: Arc<PersistenceOptions>,
    state: Arc<Mutex<FlushState>>,
}

impl PersistenceController {
    pub fn new(
        form: Arc<dyn FormModel>,
        store: Arc<dyn KeyValueStore>,
        options: PersistenceOptions,
    ) -> Self {
        Self {
            form,
            store,
            options: Arc::new(options),
            state: Arc::new(Mutex::new(FlushState::default())),
        }
    }

    /// Restores the stored snapshot into the live form.
    ///
    /// Only non-empty snapshot values are applied, and only to fields the
    /// live form still holds empty. A snapshot that cannot be parsed is
    /// left in the store untouched.
    pub fn initialize(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let key = self.options.storage_key.as_str();

        let stored = match self.store.get(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return report,
            Err(error) => {
                warn!(key, %error, "persistence: snapshot read failed, starting empty");
                return report;
            }
        };

        let snapshot = match PersistedSnapshot::parse(&stored) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(key, %error, "persistence: ignoring unreadable snapshot");
                report.corrupt = true;
                return report;
            }
        };
        report.snapshot_written_at = Some(snapshot.written_at);
        report.ignored.extend(snapshot.unreadable_fields.iter().cloned());

        for (field, value) in snapshot.record.iter() {
            if value.is_empty() {
                continue;
            }
            if !self.form.has_field(field) {
                report.ignored.push(field.to_string());
                continue;
            }
            if self
                .form
                .value(field)
                .is_some_and(|current| !current.is_empty())
            {
                report.kept_live.push(field.to_string());
                continue;
            }
            self.form.set_value(field, value.clone());
            report.restored.push(field.to_string());
        }

        info!(
            key,
            restored = report.restored.len(),
            kept_live = report.kept_live.len(),
            ignored = report.ignored.len(),
            "persistence: snapshot restored"
        );
        report
    }

    /// Starts following the live form. Must be called within a tokio
    /// runtime. Dropping the returned handle stops observation and
    /// discards any pending flush.
    pub fn observe(&self) -> ObserveHandle {
        let mut changes = self.form.subscribe();
        let controller = self.clone();
        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => controller.handle_change(&change),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "persistence: change listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        ObserveHandle {
            listener: Some(listener),
            controller: self.clone(),
        }
    }

    /// Change handler behind `observe`. Schedules a debounced flush of
    /// `change.record` unless it matches what was last written. Changes no
    /// newer than the last save, clear or handled change are dropped.
    pub fn handle_change(&self, change: &FormChange) {
        let serialized = match change.record.to_json_string() {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "persistence: could not serialize form");
                return;
            }
        };

        let mut state = self.lock_state();
        if change.revision <= state.seen_revision {
            debug!(
                revision = change.revision,
                seen = state.seen_revision,
                "persistence: dropping stale change"
            );
            return;
        }
        state.observe_revision(change.revision);

        if state.last_written.as_deref() == Some(serialized.as_str()) {
            state.cancel_pending();
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("persistence: no async runtime, change not scheduled");
            return;
        };

        state.cancel_pending();
        state.pending = Some(serialized);
        let generation = state.generation;
        let deadline = Instant::now() + self.options.debounce;
        let controller = self.clone();
        state.timer = Some(runtime.spawn(async move {
            sleep_until(deadline).await;
            controller.flush_pending(generation);
        }));
    }

    /// Writes the current live record immediately and drops any pending
    /// flush. Returns whether the store accepted the write.
    pub fn save_now(&self) -> bool {
        let mut state = self.lock_state();
        let current = self.form.snapshot();
        state.cancel_pending();
        state.observe_revision(current.revision);

        let serialized = match current.record.to_json_string() {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "persistence: could not serialize form");
                return false;
            }
        };
        self.write(&mut state, serialized)
    }

    /// Deletes the stored snapshot and forgets the last-written baseline.
    /// Edits made before this call never reach the store afterwards.
    pub fn clear_saved(&self) {
        let key = self.options.storage_key.as_str();
        let mut state = self.lock_state();
        state.cancel_pending();
        state.observe_revision(self.form.snapshot().revision);
        state.last_written = None;
        match self.store.remove(key) {
            Ok(()) => info!(key, "persistence: snapshot cleared"),
            Err(error) => warn!(key, %error, "persistence: snapshot clear failed"),
        }
    }

    pub fn has_pending_flush(&self) -> bool {
        self.lock_state().pending.is_some()
    }

    fn flush_pending(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation != generation {
            return;
        }
        state.timer = None;
        let Some(serialized) = state.pending.take() else {
            return;
        };
        self.write(&mut state, serialized);
    }

    fn write(&self, state: &mut FlushState, serialized: String) -> bool {
        let key = self.options.storage_key.as_str();
        match self.store.set(key, &serialized) {
            Ok(()) => {
                debug!(key, bytes = serialized.len(), "persistence: snapshot written");
                state.last_written = Some(serialized);
                true
            }
            Err(error) => {
                warn!(key, %error, "persistence: snapshot write failed");
                false
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FlushState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Live subscription created by [`PersistenceController::observe`].
pub struct ObserveHandle {
    listener: Option<JoinHandle<()>>,
    controller: PersistenceController,
}

impl ObserveHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ObserveHandle {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.controller.lock_state().cancel_pending();
    }
}

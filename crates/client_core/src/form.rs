use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use shared::domain::{FieldValue, FormRecord};
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One published state of a form. `revision` grows by one with every write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormChange {
    pub revision: u64,
    pub record: FormRecord,
}

/// The live, in-memory form a user is editing.
///
/// Every successful write publishes the full record to subscribers.
pub trait FormModel: Send + Sync {
    fn has_field(&self, field: &str) -> bool;
    fn value(&self, field: &str) -> Option<FieldValue>;
    /// Returns `false` when `field` is not part of the form schema.
    fn set_value(&self, field: &str, value: FieldValue) -> bool;
    /// The current record together with its revision, read atomically.
    fn snapshot(&self) -> FormChange;
    fn subscribe(&self) -> broadcast::Receiver<FormChange>;

    fn values(&self) -> FormRecord {
        self.snapshot().record
    }
}

/// A `FormModel` over a fixed field schema.
pub struct LiveForm {
    state: RwLock<FormChange>,
    changes: broadcast::Sender<FormChange>,
}

impl LiveForm {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(FormChange {
                revision: 0,
                record: FormRecord::with_fields(fields),
            }),
            changes,
        }
    }

    /// Empties every field, e.g. after a successful submission.
    pub fn reset(&self) {
        let mut state = self.write_state();
        let fields: Vec<String> = state.record.fields().map(str::to_string).collect();
        state.record = FormRecord::with_fields(fields);
        self.publish(&mut state);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, FormChange> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, FormChange> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bumps the revision and notifies subscribers while the write lock is
    /// held, so notifications arrive in revision order.
    fn publish(&self, state: &mut FormChange) {
        state.revision += 1;
        let _ = self.changes.send(state.clone());
    }
}

impl FormModel for LiveForm {
    fn has_field(&self, field: &str) -> bool {
        self.read_state().record.contains(field)
    }

    fn value(&self, field: &str) -> Option<FieldValue> {
        self.read_state().record.get(field).cloned()
    }

    fn set_value(&self, field: &str, value: FieldValue) -> bool {
        let mut state = self.write_state();
        if !state.record.contains(field) {
            debug!(field, "form: ignoring write to unknown field");
            return false;
        }
        state.record.set(field, value);
        self.publish(&mut state);
        true
    }

    fn snapshot(&self) -> FormChange {
        self.read_state().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<FormChange> {
        self.changes.subscribe()
    }
}

use std::sync::Arc;

use parking_lot::Mutex;

use rowbind_engine::{Change, ChangeObserver};

/// Observer that keeps every change it is told about. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    changes: Arc<Mutex<Vec<Change>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<Change> {
        self.changes.lock().clone()
    }

    /// Returns the recorded changes and clears the log.
    pub fn take(&self) -> Vec<Change> {
        std::mem::take(&mut *self.changes.lock())
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

impl ChangeObserver for RecordingObserver {
    fn changed(&self, change: &Change) {
        self.changes.lock().push(change.clone());
    }
}

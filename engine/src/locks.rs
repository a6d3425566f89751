//! Per-record serialization.
//!
//! The form system may re-fire the trigger for the same record in quick
//! succession. Two concurrent reconciliations racing an empty registry
//! lookup would both decide to create; holding a keyed mutex for the
//! duration of a reconciliation makes CREATE race-free per record while
//! distinct records still proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

type Key = (i64, i64);

#[derive(Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        RecordLocks::default()
    }

    /// Acquires the lock for `(form_project_id, record_id)`, waiting if a
    /// reconciliation for the same record is in flight.
    pub async fn acquire(&self, form_project_id: i64, record_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("record lock table poisoned");
            // Drop entries nobody holds anymore.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry((form_project_id, record_id))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

//! In-memory durable store for tests and embedding without persistence.

use crate::error::StoreError;
use crate::store::{reject_temporary_ids, DurableStore};
use crate::types::{ChangeSet, Identifier, ObjectRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// HashMap-backed store with the same contract as `SledStore`, plus failure
/// toggles so save-abort paths can be exercised.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<u64, ObjectRecord>>,
    next_id: AtomicU64,
    fail_commits: AtomicBool,
    fail_allocations: AtomicBool,
    fail_scans: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `commit` fail with `StoreError::Unavailable`.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `allocate_permanent_ids` fail.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `scan` fail, so query paths can be exercised.
    pub fn set_fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn allocate_permanent_ids(&self, count: usize) -> Result<Vec<Identifier>, StoreError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "identifier allocation disabled".to_string(),
            ));
        }
        Ok((0..count)
            .map(|_| Identifier::permanent(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
            .collect())
    }

    fn commit(&self, batch: &ChangeSet) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commits disabled".to_string()));
        }
        reject_temporary_ids(batch)?;
        let mut rows = self.rows.write();
        for record in batch.inserted.iter().chain(batch.updated.iter()) {
            if let Identifier::Permanent { raw } = record.id {
                rows.insert(raw, record.clone());
            }
        }
        for id in &batch.deleted {
            if let Identifier::Permanent { raw } = id {
                rows.remove(raw);
            }
        }
        Ok(())
    }

    fn read(&self, id: &Identifier) -> Result<Option<ObjectRecord>, StoreError> {
        match id {
            Identifier::Permanent { raw } => Ok(self.rows.read().get(raw).cloned()),
            Identifier::Temporary { .. } => Ok(None),
        }
    }

    fn scan(&self) -> Result<Vec<ObjectRecord>, StoreError> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scans disabled".to_string()));
        }
        Ok(self.rows.read().values().cloned().collect())
    }
}

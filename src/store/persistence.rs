//! Sled-backed durable store.

use crate::error::StoreError;
use crate::store::{reject_temporary_ids, DurableStore};
use crate::types::{ChangeSet, Identifier, ObjectRecord};
use std::path::Path;

/// Sled implementation of `DurableStore`.
///
/// Records are keyed by the permanent identifier's raw value (big-endian, so
/// iteration order matches identifier order) and bincode-encoded. Permanent
/// identifier allocation rides on sled's monotonic ID generator.
pub struct SledStore {
    db: sled::Db,
    flush_on_commit: bool,
}

impl SledStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, flush_on_commit: bool) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Unavailable(format!("failed to open sled database: {}", e)))?;
        Ok(Self { db, flush_on_commit })
    }

    fn key(raw: u64) -> [u8; 8] {
        raw.to_be_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<ObjectRecord, StoreError> {
        bincode::deserialize(bytes)
            .map_err(|e| StoreError::Codec(format!("failed to deserialize object record: {}", e)))
    }

    fn encode(record: &ObjectRecord) -> Result<Vec<u8>, StoreError> {
        bincode::serialize(record)
            .map_err(|e| StoreError::Codec(format!("failed to serialize object record: {}", e)))
    }
}

impl DurableStore for SledStore {
    fn allocate_permanent_ids(&self, count: usize) -> Result<Vec<Identifier>, StoreError> {
        (0..count)
            .map(|_| {
                self.db
                    .generate_id()
                    .map(Identifier::permanent)
                    .map_err(|e| {
                        StoreError::Unavailable(format!("failed to allocate identifier: {}", e))
                    })
            })
            .collect()
    }

    fn commit(&self, batch: &ChangeSet) -> Result<(), StoreError> {
        reject_temporary_ids(batch)?;
        let mut sled_batch = sled::Batch::default();
        for record in batch.inserted.iter().chain(batch.updated.iter()) {
            if let Identifier::Permanent { raw } = record.id {
                let key = Self::key(raw);
                sled_batch.insert(&key[..], Self::encode(record)?);
            }
        }
        for id in &batch.deleted {
            if let Identifier::Permanent { raw } = id {
                let key = Self::key(*raw);
                sled_batch.remove(&key[..]);
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| StoreError::Unavailable(format!("failed to apply batch: {}", e)))?;
        if self.flush_on_commit {
            self.db
                .flush()
                .map_err(|e| StoreError::Unavailable(format!("failed to flush database: {}", e)))?;
        }
        Ok(())
    }

    fn read(&self, id: &Identifier) -> Result<Option<ObjectRecord>, StoreError> {
        let raw = match id {
            Identifier::Permanent { raw } => *raw,
            Identifier::Temporary { .. } => return Ok(None),
        };
        match self
            .db
            .get(Self::key(raw))
            .map_err(|e| StoreError::Unavailable(format!("failed to read object: {}", e)))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self) -> Result<Vec<ObjectRecord>, StoreError> {
        let mut records = Vec::new();
        for item in self.db.iter() {
            let (_, value) =
                item.map_err(|e| StoreError::Unavailable(format!("failed to iterate store: {}", e)))?;
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }
}

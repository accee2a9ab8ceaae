//! Durable store boundary.
//!
//! Every durable write funnels through the root context into a
//! `DurableStore`; queries run through a `QueryEngine`. Both are traits so
//! the coordination layer stays independent of the backing engine. Reference
//! implementations: `SledStore` (sled + bincode) and `MemoryStore`.

pub mod memory;
pub mod persistence;
pub mod query;

pub use memory::MemoryStore;
pub use persistence::SledStore;
pub use query::StoreQueryEngine;

use crate::error::StoreError;
use crate::types::{ChangeSet, ContextSnapshot, Identifier, ObjectRecord, Query};

/// Durable backing store consumed by the identifier finalizer and the root
/// save hop.
pub trait DurableStore: Send + Sync {
    /// Allocate `count` permanent identifiers in one round-trip.
    fn allocate_permanent_ids(&self, count: usize) -> Result<Vec<Identifier>, StoreError>;

    /// Atomically apply a fully-finalized batch. Batches carrying temporary
    /// identifiers are rejected, never partially applied.
    fn commit(&self, batch: &ChangeSet) -> Result<(), StoreError>;

    /// Read the latest durable state of one object. Temporary identifiers
    /// never resolve here.
    fn read(&self, id: &Identifier) -> Result<Option<ObjectRecord>, StoreError>;

    /// Read a batch of objects. Default is a `read` loop; backends may
    /// override for fewer round-trips.
    fn read_batch(&self, ids: &[Identifier]) -> Result<Vec<Option<ObjectRecord>>, StoreError> {
        ids.iter().map(|id| self.read(id)).collect()
    }

    /// Scan every record. Backs the reference query engine; engines with
    /// their own indexes may ignore it.
    fn scan(&self) -> Result<Vec<ObjectRecord>, StoreError>;
}

/// Query execution boundary. `visible` is the executing context's overlay of
/// not-yet-durable state, layered over the store.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, query: &Query, visible: &ContextSnapshot) -> Result<Vec<Identifier>, StoreError>;
}

/// Reject batches that would push temporary identifiers across the durable
/// boundary. Shared by the reference store implementations.
pub(crate) fn reject_temporary_ids(batch: &ChangeSet) -> Result<(), StoreError> {
    let offender = batch
        .inserted
        .iter()
        .chain(batch.updated.iter())
        .map(|r| r.id)
        .chain(batch.deleted.iter().copied())
        .find(Identifier::is_temporary);
    match offender {
        Some(id) => Err(StoreError::Codec(format!(
            "temporary identifier {} in durable batch",
            id
        ))),
        None => Ok(()),
    }
}

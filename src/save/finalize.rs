//! Pre-save identifier finalization.

use crate::context::Context;
use crate::error::CoordError;
use crate::store::DurableStore;
use crate::types::Identifier;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Trades temporary identifiers for store-allocated permanent ones before a
/// context's changes cross a boundary. A temporary identifier is meaningless
/// outside the context that minted it, so the save must not push one upward.
#[derive(Clone)]
pub struct IdentifierFinalizer {
    store: Arc<dyn DurableStore>,
}

impl IdentifierFinalizer {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Rewrite every pending insert still holding a temporary identifier.
    /// Allocation is one store round-trip; failure aborts the enclosing save
    /// before anything has been drained. Must run on `context`'s queue.
    pub fn finalize(&self, context: &Context) -> Result<(), CoordError> {
        let temporaries = context.pending_temporary_inserts();
        if temporaries.is_empty() {
            return Ok(());
        }
        let permanents = self
            .store
            .allocate_permanent_ids(temporaries.len())
            .map_err(CoordError::Finalize)?;
        let mapping: HashMap<Identifier, Identifier> =
            temporaries.into_iter().zip(permanents).collect();
        context.rewrite_inserted_ids(&mapping);
        debug!(
            context = %context.id(),
            finalized = mapping.len(),
            "assigned permanent identifiers"
        );
        Ok(())
    }
}

//! Reference query engine.

use crate::error::StoreError;
use crate::store::{DurableStore, QueryEngine};
use crate::types::{ContextSnapshot, Identifier, ObjectRecord, Query};
use std::collections::HashMap;
use std::sync::Arc;

/// Full-scan engine: merges the executing context's snapshot over the durable
/// store, filters by the query, and orders by ascending identifier. The order
/// is the contract downstream translation preserves.
pub struct StoreQueryEngine {
    store: Arc<dyn DurableStore>,
}

impl StoreQueryEngine {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }
}

impl QueryEngine for StoreQueryEngine {
    fn execute(&self, query: &Query, visible: &ContextSnapshot) -> Result<Vec<Identifier>, StoreError> {
        let mut merged: HashMap<Identifier, ObjectRecord> = self
            .store
            .scan()?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        for (id, record) in &visible.rows {
            merged.insert(*id, record.clone());
        }
        for id in &visible.deleted {
            merged.remove(id);
        }

        let mut ids: Vec<Identifier> = merged
            .values()
            .filter(|record| query.accepts(record))
            .map(|record| record.id)
            .collect();
        ids.sort();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }
}

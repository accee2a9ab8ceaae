//! Typed in-process event bus for did-save notifications.

pub mod bridge;

pub use bridge::ChangeNotificationBridge;

use crate::types::{ChangeSet, ContextId, Identifier};
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Posted after a context commits a save hop; the root context's event fires
/// only once the durable write has succeeded. Carries identifier sets, not
/// records: consumers re-resolve state on their own side of the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidSaveEvent {
    pub ts: String,
    pub context: ContextId,
    pub inserted: BTreeSet<Identifier>,
    pub updated: BTreeSet<Identifier>,
    pub deleted: BTreeSet<Identifier>,
}

impl DidSaveEvent {
    pub fn new(context: ContextId, batch: &ChangeSet) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            context,
            inserted: batch.inserted.iter().map(|r| r.id).collect(),
            updated: batch.updated.iter().map(|r| r.id).collect(),
            deleted: batch.deleted.iter().copied().collect(),
        }
    }

    /// Identifiers whose latest state an observer should re-read.
    pub fn changed(&self) -> impl Iterator<Item = &Identifier> {
        self.inserted.iter().chain(self.updated.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SubscriptionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Handler = Arc<dyn Fn(&DidSaveEvent) + Send + Sync>;

/// In-process bus. Handlers run inline on the posting thread; anything
/// queue-affine must be dispatched by the handler itself.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&DidSaveEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.subscribers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn post(&self, event: DidSaveEvent) {
        debug!(
            context = %event.context,
            inserted = event.inserted.len(),
            updated = event.updated.len(),
            deleted = event.deleted.len(),
            "did-save posted"
        );
        // Clone the handler list out so handlers may subscribe/unsubscribe.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

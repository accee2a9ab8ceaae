//! Cross-context change merging.
//!
//! An observation link ties an observer context to an observed context: when
//! the observed side posts a did-save, the bridge re-reads the changed
//! identifiers from the durable store and merges them into the observer's
//! in-memory view, on the observer's own queue. Links hold only a weak
//! reference to the observer, so observing never extends a context's
//! lifetime.

use crate::bus::{DidSaveEvent, EventBus};
use crate::context::Context;
use crate::store::DurableStore;
use crate::types::{ContextId, Identifier, ObjectRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

struct LinkEntry {
    observer: Weak<Context>,
}

pub struct ChangeNotificationBridge {
    store: Arc<dyn DurableStore>,
    /// Keyed by (observer, observed); one entry per pair makes
    /// double-registration idempotent.
    links: Mutex<HashMap<(ContextId, ContextId), LinkEntry>>,
}

impl ChangeNotificationBridge {
    /// Build the bridge and subscribe it to the bus. The subscription holds a
    /// weak reference, so dropping the bridge detaches it.
    pub fn attach(bus: &EventBus, store: Arc<dyn DurableStore>) -> Arc<Self> {
        let bridge = Arc::new(Self {
            store,
            links: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&bridge);
        bus.subscribe(move |event| {
            if let Some(bridge) = weak.upgrade() {
                bridge.on_did_save(event);
            }
        });
        bridge
    }

    /// Register interest. Idempotent: the same pair registers once, so one
    /// did-save produces exactly one merge on the observer.
    pub fn observe(&self, observer: &Arc<Context>, observed: &Context) {
        let key = (observer.id(), observed.id());
        let mut links = self.links.lock();
        if links.contains_key(&key) {
            debug!(observer = %key.0, observed = %key.1, "observation already registered");
            return;
        }
        links.insert(
            key,
            LinkEntry {
                observer: Arc::downgrade(observer),
            },
        );
        debug!(observer = %key.0, observed = %key.1, "observation registered");
    }

    /// Unregister. Removing a link that does not exist is a no-op.
    pub fn stop_observing(&self, observer: &Context, observed: &Context) {
        if self
            .links
            .lock()
            .remove(&(observer.id(), observed.id()))
            .is_some()
        {
            debug!(observer = %observer.id(), observed = %observed.id(), "observation removed");
        }
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    fn on_did_save(&self, event: &DidSaveEvent) {
        if event.is_empty() {
            return;
        }
        let observers: Vec<Arc<Context>> = {
            let mut links = self.links.lock();
            links.retain(|_, entry| entry.observer.strong_count() > 0);
            links
                .iter()
                .filter(|((_, observed), _)| *observed == event.context)
                .filter_map(|(_, entry)| entry.observer.upgrade())
                .collect()
        };
        for observer in observers {
            if observer.id() == event.context {
                continue;
            }
            let store = Arc::clone(&self.store);
            let event = event.clone();
            let target = Arc::clone(&observer);
            // Merge on the observer's queue, never the observed one's.
            observer
                .queue()
                .dispatch(move || Self::merge_into(&target, store.as_ref(), &event));
        }
    }

    /// Runs on the observer's affine queue.
    fn merge_into(observer: &Arc<Context>, store: &dyn DurableStore, event: &DidSaveEvent) {
        let mut refreshed: Vec<ObjectRecord> = Vec::new();
        for id in event.changed() {
            match store.read(id) {
                Ok(Some(record)) => refreshed.push(record),
                // Not durable yet (a mid-chain hop saved); the root hop's
                // event for the same identifiers completes the merge.
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        observer = %observer.id(),
                        object = %id,
                        error = %err,
                        "merge read failed, skipping identifier"
                    );
                }
            }
        }
        let deleted: Vec<Identifier> = event.deleted.iter().copied().collect();
        observer.apply_merge(refreshed, &deleted);
        debug!(
            observer = %observer.id(),
            source = %event.context,
            "merged did-save changes"
        );
    }
}

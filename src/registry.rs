//! Per-queue context registry.
//!
//! Maps the identity of the calling execution context (managed queue or OS
//! thread) to a dedicated background context, chained as a child of one
//! shared root context that owns the durable-store hop. Contexts are created
//! lazily, cached for reuse, and destroyed only when the registry is torn
//! down. Explicit lifecycle: built at store-open, `teardown` at store-close.

use crate::context::Context;
use crate::error::CoordError;
use crate::exec::SerialQueue;
use crate::types::{ContextId, QueueIdentity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ContextRegistry {
    root: Arc<Context>,
    foreground: SerialQueue,
    /// Cache keyed by caller identity. Each context is also keyed by its own
    /// queue, so a lookup from inside one of its jobs resolves to itself.
    contexts: RwLock<HashMap<QueueIdentity, Arc<Context>>>,
    obtain_permanent_ids: bool,
    closed: AtomicBool,
}

impl ContextRegistry {
    pub fn new(obtain_permanent_ids: bool) -> Self {
        let root = Context::root("root", SerialQueue::new("root-context"));
        let foreground = SerialQueue::new("foreground");
        Self {
            root,
            foreground,
            contexts: RwLock::new(HashMap::new()),
            obtain_permanent_ids,
            closed: AtomicBool::new(false),
        }
    }

    /// The shared root context. Its queue is the single-writer serialization
    /// point in front of the durable store.
    pub fn root(&self) -> &Arc<Context> {
        &self.root
    }

    /// The queue async outcomes default to for callers that are not on a
    /// managed queue.
    pub fn foreground(&self) -> &SerialQueue {
        &self.foreground
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The cached background context for `identity`, created on first use as
    /// a child of the root.
    pub fn context_for(&self, identity: QueueIdentity) -> Result<Arc<Context>, CoordError> {
        if self.is_closed() {
            return Err(CoordError::RegistryClosed);
        }
        if let Some(context) = self.contexts.read().get(&identity) {
            return Ok(Arc::clone(context));
        }

        let mut contexts = self.contexts.write();
        // Another caller may have created it between the locks.
        if let Some(context) = contexts.get(&identity) {
            return Ok(Arc::clone(context));
        }
        if self.is_closed() {
            return Err(CoordError::RegistryClosed);
        }

        // Two cache keys per context (caller identity + own queue).
        let ordinal = contexts.len() / 2 + 1;
        let label = format!("background-{}", ordinal);
        let queue = SerialQueue::new(label.clone());
        let context = Context::child(label, queue.clone(), Arc::clone(&self.root));
        context.set_obtain_permanent_ids(self.obtain_permanent_ids);
        contexts.insert(identity, Arc::clone(&context));
        contexts.insert(QueueIdentity::Queue(queue.id()), Arc::clone(&context));
        info!(
            context = %context.id(),
            caller = %identity,
            queue = %queue.id(),
            "created background context"
        );
        Ok(context)
    }

    /// The cached background context for the calling queue or thread.
    pub fn context_for_current(&self) -> Result<Arc<Context>, CoordError> {
        self.context_for(SerialQueue::current_identity())
    }

    /// Close the registry: reject further lookups, drain and join every
    /// managed queue, and drop the cache. Contexts still held by callers
    /// survive, but their queues no longer accept work.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let contexts: Vec<Arc<Context>> = {
            let mut cache = self.contexts.write();
            let mut drained: Vec<Arc<Context>> = Vec::new();
            let mut seen: Vec<ContextId> = Vec::new();
            for (_, context) in cache.drain() {
                if !seen.contains(&context.id()) {
                    seen.push(context.id());
                    drained.push(context);
                }
            }
            drained
        };
        for context in &contexts {
            debug!(context = %context.id(), "shutting down background context queue");
            context.queue().shutdown();
        }
        self.root.queue().shutdown();
        self.foreground.shutdown();
        info!(contexts = contexts.len(), "context registry torn down");
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

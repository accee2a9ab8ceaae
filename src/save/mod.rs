//! Save propagation across the context hierarchy.
//!
//! A save is a chain of hops, one per context from the saving context up to
//! the root. Each hop is a discrete job posted to that hop's affine queue
//! carrying the incoming batch and a boxed completion, so stack depth stays
//! bounded regardless of hierarchy depth and no context's queue ever executes
//! another context's work. The chain stops at the first failing hop; hops
//! already committed below it stay committed.

pub mod finalize;

pub use finalize::IdentifierFinalizer;

use crate::bus::{DidSaveEvent, EventBus};
use crate::context::Context;
use crate::dispatch::CallbackDispatcher;
use crate::error::CoordError;
use crate::exec::SerialQueue;
use crate::store::DurableStore;
use crate::types::{ChangeSet, ContextId};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What one hop committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopCommit {
    pub context: ContextId,
    pub label: String,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl HopCommit {
    fn new(context: &Context, batch: &ChangeSet) -> Self {
        Self {
            context: context.id(),
            label: context.label().to_string(),
            inserted: batch.inserted.len(),
            updated: batch.updated.len(),
            deleted: batch.deleted.len(),
        }
    }
}

/// Per-hop commit counts, in hop order (saving context first, root last).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub hops: Vec<HopCommit>,
}

type SaveCompletion = Box<dyn FnOnce(Result<SaveReport, CoordError>) + Send + 'static>;

struct HopTask {
    context: Arc<Context>,
    incoming: ChangeSet,
    report: SaveReport,
    store: Arc<dyn DurableStore>,
    finalizer: IdentifierFinalizer,
    bus: Arc<EventBus>,
    completion: SaveCompletion,
}

pub struct SaveOrchestrator {
    store: Arc<dyn DurableStore>,
    finalizer: IdentifierFinalizer,
    bus: Arc<EventBus>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl SaveOrchestrator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        bus: Arc<EventBus>,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        let finalizer = IdentifierFinalizer::new(Arc::clone(&store));
        Self {
            store,
            finalizer,
            bus,
            dispatcher,
        }
    }

    /// Start the chain and return immediately. Exactly one of the two
    /// callbacks fires, on its resolved queue (explicit queue, else the
    /// caller's queue captured now, else the foreground queue).
    pub fn save_async<S, F>(
        &self,
        context: &Arc<Context>,
        on_success: S,
        on_failure: F,
        success_queue: Option<SerialQueue>,
        failure_queue: Option<SerialQueue>,
    ) where
        S: FnOnce(SaveReport) + Send + 'static,
        F: FnOnce(CoordError) + Send + 'static,
    {
        let completion =
            self.dispatcher
                .completion(on_success, on_failure, success_queue, failure_queue);
        self.start(Arc::clone(context), completion);
    }

    /// Run the chain and block until it completes. Rejected with
    /// `ReentrantCall` when invoked from any queue the chain would block on.
    pub fn save_sync(&self, context: &Arc<Context>) -> Result<SaveReport, CoordError> {
        if let Some(current) = SerialQueue::current_id() {
            if context.chain_contains_queue(current) {
                return Err(CoordError::ReentrantCall { queue: current });
            }
        }
        let (tx, rx) = oneshot::channel();
        self.start(
            Arc::clone(context),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.blocking_recv()
            .map_err(|_| CoordError::Teardown("save chain dropped before completion".to_string()))?
    }

    fn start(&self, context: Arc<Context>, completion: SaveCompletion) {
        debug!(context = %context.id(), "save chain started");
        Self::schedule_hop(HopTask {
            context,
            incoming: ChangeSet::default(),
            report: SaveReport::default(),
            store: Arc::clone(&self.store),
            finalizer: self.finalizer.clone(),
            bus: Arc::clone(&self.bus),
            completion,
        });
    }

    fn schedule_hop(task: HopTask) {
        let queue = task.context.queue().clone();
        queue.dispatch(move || Self::execute_hop(task));
    }

    /// One hop, running on its context's affine queue.
    fn execute_hop(task: HopTask) {
        let HopTask {
            context,
            incoming,
            mut report,
            store,
            finalizer,
            bus,
            completion,
        } = task;

        // The child's committed batch becomes this context's pending state.
        if !incoming.is_empty() {
            context.absorb_batch(&incoming);
        }

        if context.obtains_permanent_ids() {
            if let Err(err) = finalizer.finalize(&context) {
                warn!(
                    context = %context.id(),
                    error = %err,
                    "save aborted during identifier finalization"
                );
                completion(Err(err));
                return;
            }
        }

        let batch = context.drain_pending();
        match context.parent() {
            Some(parent) => {
                context.apply_to_rows(&batch);
                report.hops.push(HopCommit::new(&context, &batch));
                bus.post(DidSaveEvent::new(context.id(), &batch));
                debug!(
                    context = %context.id(),
                    objects = batch.len(),
                    parent = %parent.id(),
                    "hop committed in-memory, forwarding to parent"
                );
                Self::schedule_hop(HopTask {
                    context: Arc::clone(parent),
                    incoming: batch,
                    report,
                    store,
                    finalizer,
                    bus,
                    completion,
                });
            }
            None => match store.commit(&batch) {
                Ok(()) => {
                    context.apply_to_rows(&batch);
                    report.hops.push(HopCommit::new(&context, &batch));
                    bus.post(DidSaveEvent::new(context.id(), &batch));
                    info!(
                        context = %context.id(),
                        objects = batch.len(),
                        "durable commit complete"
                    );
                    completion(Ok(report));
                }
                Err(source) => {
                    // Keep the drained changes pending so a retried save can
                    // still commit them; lower hops are not rolled back.
                    context.absorb_batch(&batch);
                    warn!(
                        context = %context.id(),
                        error = %source,
                        "durable commit failed"
                    );
                    completion(Err(CoordError::Save {
                        context: context.id(),
                        label: context.label().to_string(),
                        source,
                    }));
                }
            },
        }
    }
}

//! Cross-context fetch orchestration.
//!
//! Queries execute on a background context resolved from the registry by the
//! calling queue identity, against that context's snapshot layered over the
//! store. Raw objects never cross the boundary: results come back as
//! identifiers, and materialization re-resolves each identifier into a fresh
//! `ManagedObject` bound to the caller's context, on the caller's queue.
//! Fetch is all-or-nothing; a single failed translation fails the request.

use crate::context::{Context, Visibility};
use crate::dispatch::CallbackDispatcher;
use crate::error::{CoordError, FetchFailure, StoreError};
use crate::exec::SerialQueue;
use crate::registry::ContextRegistry;
use crate::store::{DurableStore, QueryEngine};
use crate::types::{FetchItem, Identifier, ManagedObject, Query};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

pub type FetchResults = Vec<FetchItem>;

type FetchCompletion = Box<dyn FnOnce(Result<FetchResults, CoordError>) + Send + 'static>;

pub struct FetchOrchestrator {
    registry: Arc<ContextRegistry>,
    engine: Arc<dyn QueryEngine>,
    store: Arc<dyn DurableStore>,
    dispatcher: Arc<CallbackDispatcher>,
}

impl FetchOrchestrator {
    pub fn new(
        registry: Arc<ContextRegistry>,
        engine: Arc<dyn QueryEngine>,
        store: Arc<dyn DurableStore>,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            dispatcher,
        }
    }

    /// Start the fetch and return immediately. Exactly one of the callbacks
    /// fires, on its resolved queue.
    pub fn fetch_async<S, F>(
        &self,
        query: Query,
        ids_only: bool,
        caller: &Arc<Context>,
        on_success: S,
        on_failure: F,
        success_queue: Option<SerialQueue>,
        failure_queue: Option<SerialQueue>,
    ) where
        S: FnOnce(FetchResults) + Send + 'static,
        F: FnOnce(CoordError) + Send + 'static,
    {
        let completion =
            self.dispatcher
                .completion(on_success, on_failure, success_queue, failure_queue);
        self.run(query, ids_only, Arc::clone(caller), completion);
    }

    /// Run the fetch and block for the results. Rejected with `ReentrantCall`
    /// from the background context's queue or the caller context's queue,
    /// since the wait would block a queue the fetch needs.
    pub fn fetch_sync(
        &self,
        query: Query,
        ids_only: bool,
        caller: &Arc<Context>,
    ) -> Result<FetchResults, CoordError> {
        let background = self.registry.context_for_current()?;
        if let Some(current) = SerialQueue::current_id() {
            if background.queue().id() == current || caller.queue().id() == current {
                return Err(CoordError::ReentrantCall { queue: current });
            }
        }
        let (tx, rx) = oneshot::channel();
        self.run(
            query,
            ids_only,
            Arc::clone(caller),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.blocking_recv()
            .map_err(|_| CoordError::Teardown("fetch dropped before completion".to_string()))?
    }

    /// Dispatch the query onto the background context; every outcome flows
    /// through `completion` exactly once.
    fn run(&self, query: Query, ids_only: bool, caller: Arc<Context>, completion: FetchCompletion) {
        let background = match self.registry.context_for_current() {
            Ok(context) => context,
            Err(err) => {
                completion(Err(err));
                return;
            }
        };
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let bg = Arc::clone(&background);
        debug!(
            background = %background.id(),
            caller = %caller.id(),
            entity = %query.entity,
            ids_only,
            "fetch dispatched"
        );
        background.queue().dispatch(move || {
            let snapshot = bg.snapshot();
            let ids = match engine.execute(&query, &snapshot) {
                Ok(ids) => ids,
                Err(err) => {
                    completion(Err(CoordError::Fetch(FetchFailure::Query(err))));
                    return;
                }
            };
            if ids_only {
                completion(Ok(ids.into_iter().map(FetchItem::Id).collect()));
                return;
            }
            // Translation runs on the caller's queue; identifiers cross the
            // boundary, objects do not.
            let destination = Arc::clone(&caller);
            caller.queue().dispatch(move || {
                let mut results = Vec::with_capacity(ids.len());
                for id in ids {
                    match Self::materialize(&destination, store.as_ref(), id) {
                        Ok(object) => results.push(FetchItem::Object(object)),
                        Err(failure) => {
                            completion(Err(CoordError::Fetch(failure)));
                            return;
                        }
                    }
                }
                completion(Ok(results));
            });
        });
    }

    /// Re-resolve one identifier into an object bound to `destination`. Runs
    /// on the destination's affine queue. The destination's own view wins;
    /// otherwise the durable store is read and the record adopted into the
    /// destination's committed view.
    fn materialize(
        destination: &Arc<Context>,
        store: &dyn DurableStore,
        id: Identifier,
    ) -> Result<ManagedObject, FetchFailure> {
        match destination.visibility(id) {
            Visibility::PendingUpsert(record) => Ok(ManagedObject {
                record,
                context: destination.id(),
                dirty: true,
            }),
            Visibility::Committed(record) => Ok(ManagedObject {
                record,
                context: destination.id(),
                dirty: false,
            }),
            Visibility::Tombstoned => Err(FetchFailure::Translation {
                id,
                context: destination.id(),
                source: StoreError::ObjectNotFound(id),
            }),
            Visibility::Unknown => {
                let record = store
                    .read(&id)
                    .map_err(|source| FetchFailure::Translation {
                        id,
                        context: destination.id(),
                        source,
                    })?
                    .ok_or(FetchFailure::Translation {
                        id,
                        context: destination.id(),
                        source: StoreError::ObjectNotFound(id),
                    })?;
                destination.adopt(record.clone());
                Ok(ManagedObject {
                    record,
                    context: destination.id(),
                    dirty: false,
                })
            }
        }
    }
}

//! Coordinator facade.
//!
//! Wires the store, query engine, bus, registry, orchestrators, bridge, and
//! dispatcher into the surface embedders use. The coordinator owns the data
//! access lifecycle: build one at store-open, `shutdown` at store-close.

use crate::bus::{ChangeNotificationBridge, EventBus};
use crate::config::StrataConfig;
use crate::context::Context;
use crate::dispatch::CallbackDispatcher;
use crate::error::CoordError;
use crate::exec::SerialQueue;
use crate::fetch::{FetchOrchestrator, FetchResults};
use crate::registry::ContextRegistry;
use crate::save::{SaveOrchestrator, SaveReport};
use crate::store::{DurableStore, MemoryStore, QueryEngine, SledStore, StoreQueryEngine};
use crate::types::Query;
use std::sync::Arc;
use tracing::info;

pub struct Coordinator {
    store: Arc<dyn DurableStore>,
    registry: Arc<ContextRegistry>,
    bus: Arc<EventBus>,
    dispatcher: Arc<CallbackDispatcher>,
    bridge: Arc<ChangeNotificationBridge>,
    saves: SaveOrchestrator,
    fetches: FetchOrchestrator,
}

impl Coordinator {
    /// Open against the configured store: sled at `store.path` when set,
    /// in-memory otherwise.
    pub fn open(config: &StrataConfig) -> Result<Self, CoordError> {
        let store: Arc<dyn DurableStore> = match &config.store.path {
            Some(path) => Arc::new(
                SledStore::open(path, config.store.flush_on_commit)
                    .map_err(|e| CoordError::Config(format!("failed to open store: {}", e)))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(store, config))
    }

    /// Build around an injected store (tests, custom backends) with the
    /// reference query engine.
    pub fn with_store(store: Arc<dyn DurableStore>, config: &StrataConfig) -> Self {
        let engine: Arc<dyn QueryEngine> = Arc::new(StoreQueryEngine::new(Arc::clone(&store)));
        Self::with_parts(store, engine, config)
    }

    /// Build around an injected store and query engine.
    pub fn with_parts(
        store: Arc<dyn DurableStore>,
        engine: Arc<dyn QueryEngine>,
        config: &StrataConfig,
    ) -> Self {
        let registry = Arc::new(ContextRegistry::new(config.obtain_permanent_ids));
        let bus = Arc::new(EventBus::new());
        let dispatcher = Arc::new(CallbackDispatcher::new(registry.foreground().clone()));
        let bridge = ChangeNotificationBridge::attach(&bus, Arc::clone(&store));
        let saves = SaveOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&dispatcher),
        );
        let fetches = FetchOrchestrator::new(
            Arc::clone(&registry),
            engine,
            Arc::clone(&store),
            Arc::clone(&dispatcher),
        );
        info!(obtain_permanent_ids = config.obtain_permanent_ids, "coordinator opened");
        Self {
            store,
            registry,
            bus,
            dispatcher,
            bridge,
            saves,
            fetches,
        }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.dispatcher
    }

    pub fn bridge(&self) -> &Arc<ChangeNotificationBridge> {
        &self.bridge
    }

    /// The queue async outcomes default to for unmanaged callers.
    pub fn foreground(&self) -> &SerialQueue {
        self.registry.foreground()
    }

    /// The cached background context for the calling queue or thread.
    pub fn context_for_current(&self) -> Result<Arc<Context>, CoordError> {
        self.registry.context_for_current()
    }

    /// Asynchronous save: commits `context`'s pending changes and propagates
    /// hop by hop to the durable store. Returns immediately; exactly one of
    /// the callbacks fires.
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
        self.saves
            .save_async(context, on_success, on_failure, success_queue, failure_queue);
    }

    /// Synchronous save: blocks until the whole chain completes.
    pub fn save_sync(&self, context: &Arc<Context>) -> Result<SaveReport, CoordError> {
        self.saves.save_sync(context)
    }

    /// Asynchronous fetch: executes on a background context and hands back
    /// identifiers or objects translated onto `caller`.
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
        self.fetches.fetch_async(
            query,
            ids_only,
            caller,
            on_success,
            on_failure,
            success_queue,
            failure_queue,
        );
    }

    /// Synchronous fetch: blocks until results are translated.
    pub fn fetch_sync(
        &self,
        query: Query,
        ids_only: bool,
        caller: &Arc<Context>,
    ) -> Result<FetchResults, CoordError> {
        self.fetches.fetch_sync(query, ids_only, caller)
    }

    /// Subscribe `observer` to `observed`'s did-save events. Idempotent.
    pub fn observe(&self, observer: &Arc<Context>, observed: &Context) {
        self.bridge.observe(observer, observed);
    }

    /// Unsubscribe; absent links are a no-op.
    pub fn stop_observing(&self, observer: &Context, observed: &Context) {
        self.bridge.stop_observing(observer, observed);
    }

    /// Tear down the registry and its queues. In-flight asynchronous work is
    /// drained; new lookups fail with `RegistryClosed`.
    pub fn shutdown(&self) {
        self.registry.teardown();
        info!("coordinator shut down");
    }
}

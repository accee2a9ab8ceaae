//! Shared test utilities for integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};
use strata::config::StrataConfig;
use strata::store::{DurableStore, MemoryStore};
use strata::types::{AttributeValue, Attributes};
use strata::Coordinator;

/// Coordinator over an injected in-memory store, so tests can toggle store
/// failures and inspect durable state directly.
pub fn memory_coordinator() -> (Arc<Coordinator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::with_store(
        Arc::clone(&store) as Arc<dyn DurableStore>,
        &StrataConfig::default(),
    );
    (Arc::new(coordinator), store)
}

/// Single-attribute map, the common shape in these tests.
pub fn titled(value: &str) -> Attributes {
    let mut map = Attributes::new();
    map.insert("title".to_string(), AttributeValue::from(value));
    map
}

/// Poll until `probe` holds or the timeout elapses. Asynchronous work lands
/// on worker queues, so assertions about its effects wait rather than race.
pub fn wait_until(probe: impl Fn() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if probe() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

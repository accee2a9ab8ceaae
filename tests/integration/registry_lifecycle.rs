//! Registry lifecycle and per-queue context caching.

use super::test_utils::memory_coordinator;
use std::sync::Arc;
use std::thread;
use strata::CoordError;

#[test]
fn same_caller_always_gets_the_same_context() {
    let (coordinator, _store) = memory_coordinator();
    let a = coordinator.context_for_current().unwrap();
    let b = coordinator.context_for_current().unwrap();
    assert_eq!(a.id(), b.id());
}

#[test]
fn distinct_callers_get_distinct_contexts() {
    let (coordinator, _store) = memory_coordinator();
    let here = coordinator.context_for_current().unwrap();

    let mut remote_ids = Vec::new();
    for _ in 0..3 {
        let inner = Arc::clone(&coordinator);
        let id = thread::spawn(move || inner.context_for_current().map(|c| c.id()))
            .join()
            .unwrap()
            .unwrap();
        remote_ids.push(id);
    }

    for id in &remote_ids {
        assert_ne!(*id, here.id());
    }
    // Each thread identity is distinct, so each context is too.
    let mut deduped = remote_ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), remote_ids.len());
}

#[test]
fn background_contexts_obtain_permanent_ids_by_default() {
    let (coordinator, _store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    assert!(context.obtains_permanent_ids());
    assert!(!context.is_root());
    assert!(context.parent().unwrap().is_root());
}

#[test]
fn shutdown_closes_the_registry() {
    let (coordinator, _store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    coordinator.shutdown();

    assert!(coordinator.registry().is_closed());
    assert!(matches!(
        coordinator.context_for_current(),
        Err(CoordError::RegistryClosed)
    ));
    // Held handles survive teardown; only the registry refuses new lookups.
    assert!(!context.is_root());
}

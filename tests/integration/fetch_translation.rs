//! Fetch orchestration: background execution, translation, all-or-nothing.

use super::test_utils::{memory_coordinator, titled};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use strata::context::Context;
use strata::types::{AttributeValue, FetchItem, Identifier, Query};
use strata::{CoordError, Coordinator, FetchFailure};

/// Insert and durably save a record from a different caller identity,
/// returning that caller's context and the saved identifier.
fn seed_from_other_thread(
    coordinator: &Arc<Coordinator>,
    title: &str,
) -> (Arc<Context>, Identifier) {
    let inner = Arc::clone(coordinator);
    let title = title.to_string();
    thread::spawn(move || {
        let context = inner.context_for_current().unwrap();
        context.insert("note", titled(&title));
        inner.save_sync(&context).unwrap();
        let id = inner
            .store()
            .scan()
            .unwrap()
            .into_iter()
            .find(|r| r.attribute("title") == Some(&AttributeValue::from(title.as_str())))
            .unwrap()
            .id;
        (context, id)
    })
    .join()
    .unwrap()
}

#[test]
fn cross_context_round_trip_preserves_attributes() {
    let (coordinator, _store) = memory_coordinator();
    let (_writer, id) = seed_from_other_thread(&coordinator, "shared-note");

    let caller = coordinator.context_for_current().unwrap();
    let results = coordinator
        .fetch_sync(Query::matching("note", "title", "shared-note"), false, &caller)
        .unwrap();

    assert_eq!(results.len(), 1);
    match &results[0] {
        FetchItem::Object(object) => {
            assert_eq!(object.id(), id);
            assert_eq!(object.context, caller.id());
            assert!(!object.dirty);
            assert_eq!(
                object.attribute("title"),
                Some(&AttributeValue::from("shared-note"))
            );
        }
        other => panic!("expected a materialized object, got {other:?}"),
    }
    // Translation adopted the record into the caller's view.
    assert!(caller.object(id).is_some());
}

#[test]
fn identifier_only_fetch_skips_materialization() {
    let (coordinator, _store) = memory_coordinator();
    let (_writer, id) = seed_from_other_thread(&coordinator, "only-ids");

    let caller = coordinator.context_for_current().unwrap();
    let results = coordinator
        .fetch_sync(Query::matching("note", "title", "only-ids"), true, &caller)
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], FetchItem::Id(got) if got == id));
    // Nothing was adopted into the caller's view.
    assert!(caller.object(id).is_none());
}

#[test]
fn results_keep_the_engine_order() {
    let (coordinator, _store) = memory_coordinator();
    let caller = coordinator.context_for_current().unwrap();
    for title in ["a", "b", "c", "d"] {
        caller.insert("note", titled(title));
    }
    coordinator.save_sync(&caller).unwrap();

    let results = coordinator
        .fetch_sync(Query::all("note"), false, &caller)
        .unwrap();
    let ids: Vec<Identifier> = results.iter().map(FetchItem::id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids.len(), 4);
    assert_eq!(ids, sorted);
}

#[test]
fn translation_failure_returns_no_partial_results() {
    let (coordinator, _store) = memory_coordinator();
    // The writer's context pending-deletes one of two saved records; fetching
    // onto it must fail wholesale, not skip the tombstoned object.
    let (writer, first) = seed_from_other_thread(&coordinator, "kept");
    let (_other, second) = seed_from_other_thread(&coordinator, "dropped");
    assert_ne!(first, second);
    writer.delete(second);

    let err = coordinator
        .fetch_sync(Query::all("note"), false, &writer)
        .unwrap_err();
    match err {
        CoordError::Fetch(FetchFailure::Translation { id, context, .. }) => {
            assert_eq!(id, second);
            assert_eq!(context, writer.id());
        }
        other => panic!("expected translation failure, got {other:?}"),
    }

    // Identifier-only fetches bypass translation and still succeed.
    let ids = coordinator
        .fetch_sync(Query::all("note"), true, &writer)
        .unwrap();
    assert_eq!(ids.len(), 2);
}

#[test]
fn query_failure_is_surfaced_with_no_results() {
    let (coordinator, store) = memory_coordinator();
    let (_writer, _id) = seed_from_other_thread(&coordinator, "unreachable");
    let caller = coordinator.context_for_current().unwrap();

    store.set_fail_scans(true);
    let err = coordinator
        .fetch_sync(Query::all("note"), true, &caller)
        .unwrap_err();
    assert!(matches!(
        err,
        CoordError::Fetch(FetchFailure::Query(_))
    ));

    store.set_fail_scans(false);
    let results = coordinator
        .fetch_sync(Query::all("note"), true, &caller)
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn async_fetch_delivers_off_the_background_queue() {
    let (coordinator, _store) = memory_coordinator();
    let (_writer, _id) = seed_from_other_thread(&coordinator, "async-note");
    let caller = coordinator.context_for_current().unwrap();
    let background_queue = caller.queue().id();
    let (tx, rx) = channel();

    coordinator.fetch_async(
        Query::matching("note", "title", "async-note"),
        false,
        &caller,
        move |results| {
            let _ = tx.send((results.len(), strata::exec::SerialQueue::current_id()));
        },
        |err| panic!("fetch failed: {err}"),
        None,
        None,
    );

    let (count, queue) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(count, 1);
    // The caller is unmanaged, so delivery defaulted to the foreground
    // queue, never the background context's own queue.
    assert_eq!(queue, Some(coordinator.foreground().id()));
    assert_ne!(queue, Some(background_queue));
}

#[test]
fn sync_fetch_from_the_background_queue_is_rejected() {
    let (coordinator, _store) = memory_coordinator();
    let caller = coordinator.context_for_current().unwrap();

    let inner_coordinator = Arc::clone(&coordinator);
    let inner_caller = Arc::clone(&caller);
    let result = caller.queue().run_sync(move || {
        inner_coordinator.fetch_sync(Query::all("note"), true, &inner_caller)
    });
    assert!(matches!(result, Err(CoordError::ReentrantCall { .. })));
}

#[test]
fn fetch_after_shutdown_reports_registry_closed() {
    let (coordinator, _store) = memory_coordinator();
    let caller = coordinator.context_for_current().unwrap();
    coordinator.shutdown();
    assert!(matches!(
        coordinator.fetch_sync(Query::all("note"), true, &caller),
        Err(CoordError::RegistryClosed)
    ));
}

//! Save propagation: finalization, hop commits, failure surfacing, ordering.

use super::test_utils::{memory_coordinator, titled, wait_until};
use parking_lot::Mutex;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;
use strata::exec::SerialQueue;
use strata::store::DurableStore;
use strata::types::{AttributeValue, Identifier};
use strata::CoordError;

#[test]
fn successful_save_reaches_the_store_with_permanent_ids() {
    let (coordinator, store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    let tmp = context.insert("note", titled("hello"));
    assert!(tmp.is_temporary());

    let report = coordinator.save_sync(&context).unwrap();
    // Background context hop plus the root hop.
    assert_eq!(report.hops.len(), 2);
    assert_eq!(report.hops[0].inserted, 1);
    assert_eq!(report.hops[1].label, "root");

    let stored = store.scan().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id.is_permanent());
    assert_eq!(
        stored[0].attribute("title"),
        Some(&AttributeValue::from("hello"))
    );
    // No inserted object retains a temporary identifier after the save.
    assert!(context.object(tmp).is_none());
    assert!(context.object(stored[0].id).is_some());
}

#[test]
fn root_failure_keeps_child_commit_and_names_the_hop() {
    let (coordinator, store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    context.insert("note", titled("stranded"));

    // Capture the child hop's did-save to learn the finalized identifier.
    let inserted: Arc<Mutex<Vec<Identifier>>> = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::clone(&inserted);
    let child_id = context.id();
    coordinator.bus().subscribe(move |event| {
        if event.context == child_id {
            probe.lock().extend(event.inserted.iter().copied());
        }
    });

    store.set_fail_commits(true);
    let err = coordinator.save_sync(&context).unwrap_err();
    match err {
        CoordError::Save { label, .. } => assert_eq!(label, "root"),
        other => panic!("expected Save error, got {other:?}"),
    }

    // The child's in-memory commit is still applied...
    let id = inserted.lock()[0];
    assert!(id.is_permanent());
    assert!(context.object(id).is_some());
    assert!(!context.has_pending_changes());
    // ...while nothing reached the store.
    assert!(store.is_empty());
}

#[test]
fn finalize_failure_aborts_and_preserves_pending_state() {
    let (coordinator, store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    let tmp = context.insert("note", titled("stuck"));

    store.set_fail_allocations(true);
    let err = coordinator.save_sync(&context).unwrap_err();
    assert!(matches!(err, CoordError::Finalize(_)));
    assert!(store.is_empty());
    // The insert is still pending under its temporary identifier, so the
    // caller can retry once the store recovers.
    assert!(context.object(tmp).is_some());

    store.set_fail_allocations(false);
    coordinator.save_sync(&context).unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn async_callbacks_fire_in_submission_order() {
    let (coordinator, _store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    let (tx, rx) = channel();

    context.insert("note", titled("first"));
    let tx1 = tx.clone();
    coordinator.save_async(
        &context,
        move |_| {
            let _ = tx1.send("s1");
        },
        |err| panic!("s1 failed: {err}"),
        None,
        None,
    );

    context.insert("note", titled("second"));
    let tx2 = tx.clone();
    coordinator.save_async(
        &context,
        move |_| {
            let _ = tx2.send("s2");
        },
        |err| panic!("s2 failed: {err}"),
        None,
        None,
    );

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "s1");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "s2");
}

#[test]
fn async_outcome_lands_on_the_requested_queue() {
    let (coordinator, _store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    let callback_queue = SerialQueue::new("save-callbacks");
    let expected = callback_queue.id();
    let (tx, rx) = channel();

    context.insert("note", titled("routed"));
    coordinator.save_async(
        &context,
        move |report| {
            let _ = tx.send((report.hops.len(), SerialQueue::current_id()));
        },
        |err| panic!("save failed: {err}"),
        Some(callback_queue),
        None,
    );

    let (hops, queue) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(hops, 2);
    assert_eq!(queue, Some(expected));
}

#[test]
fn async_failure_callback_fires_exactly_once() {
    let (coordinator, store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    context.insert("note", titled("doomed"));
    store.set_fail_commits(true);

    let failures = Arc::new(Mutex::new(0usize));
    let probe = Arc::clone(&failures);
    coordinator.save_async(
        &context,
        |_| panic!("success must not fire"),
        move |err| {
            assert!(matches!(err, CoordError::Save { .. }));
            *probe.lock() += 1;
        },
        None,
        None,
    );

    assert!(wait_until(
        || *failures.lock() == 1,
        Duration::from_secs(5)
    ));
    // Give the chain time to double-deliver if it ever would.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*failures.lock(), 1);
}

#[test]
fn sync_save_from_the_affine_queue_is_rejected() {
    let (coordinator, _store) = memory_coordinator();
    let context = coordinator.context_for_current().unwrap();
    context.insert("note", titled("reentrant"));

    let inner_coordinator = Arc::clone(&coordinator);
    let inner_context = Arc::clone(&context);
    let result = context
        .queue()
        .run_sync(move || inner_coordinator.save_sync(&inner_context));
    assert!(matches!(result, Err(CoordError::ReentrantCall { .. })));

    // The rejection left the pending change intact; a normal save works.
    coordinator.save_sync(&context).unwrap();
}

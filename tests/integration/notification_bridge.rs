//! Cross-context change notification and merging.

use super::test_utils::{memory_coordinator, titled, wait_until};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use strata::types::{AttributeValue, Identifier};
use strata::Coordinator;

/// Save a record from another caller identity and return its identifier.
fn save_from_other_thread(coordinator: &Arc<Coordinator>, title: &str) -> Identifier {
    let inner = Arc::clone(coordinator);
    let title = title.to_string();
    thread::spawn(move || {
        let context = inner.context_for_current().unwrap();
        context.insert("note", titled(&title));
        inner.save_sync(&context).unwrap();
        inner
            .store()
            .scan()
            .unwrap()
            .into_iter()
            .find(|r| r.attribute("title") == Some(&AttributeValue::from(title.as_str())))
            .unwrap()
            .id
    })
    .join()
    .unwrap()
}

#[test]
fn observer_merges_root_commits() {
    let (coordinator, _store) = memory_coordinator();
    let observer = coordinator.context_for_current().unwrap();
    coordinator.observe(&observer, coordinator.registry().root());

    let id = save_from_other_thread(&coordinator, "broadcast");

    assert!(wait_until(
        || observer.merge_count() >= 1,
        Duration::from_secs(5)
    ));
    let merged = observer.object(id).unwrap();
    assert!(!merged.dirty);
    assert_eq!(
        merged.attribute("title"),
        Some(&AttributeValue::from("broadcast"))
    );
}

#[test]
fn double_registration_merges_exactly_once_per_event() {
    let (coordinator, _store) = memory_coordinator();
    let observer = coordinator.context_for_current().unwrap();
    let root = coordinator.registry().root();
    coordinator.observe(&observer, root);
    coordinator.observe(&observer, root);
    assert_eq!(coordinator.bridge().link_count(), 1);

    save_from_other_thread(&coordinator, "once");

    assert!(wait_until(
        || observer.merge_count() >= 1,
        Duration::from_secs(5)
    ));
    // Let any duplicate merge land before asserting there is none.
    std::thread::sleep(Duration::from_millis(50));
    observer.queue().run_sync(|| ());
    assert_eq!(observer.merge_count(), 1);
}

#[test]
fn stop_observing_halts_merges() {
    let (coordinator, _store) = memory_coordinator();
    let observer = coordinator.context_for_current().unwrap();
    let root = coordinator.registry().root();
    coordinator.observe(&observer, root);

    save_from_other_thread(&coordinator, "seen");
    assert!(wait_until(
        || observer.merge_count() == 1,
        Duration::from_secs(5)
    ));

    coordinator.stop_observing(&observer, root);
    save_from_other_thread(&coordinator, "unseen");
    std::thread::sleep(Duration::from_millis(50));
    observer.queue().run_sync(|| ());
    assert_eq!(observer.merge_count(), 1);
}

#[test]
fn unregistering_an_absent_link_is_a_noop() {
    let (coordinator, _store) = memory_coordinator();
    let observer = coordinator.context_for_current().unwrap();
    let root = coordinator.registry().root();
    // Never registered; removing must not error or disturb other links.
    coordinator.stop_observing(&observer, root);
    assert_eq!(coordinator.bridge().link_count(), 0);
}

#[test]
fn observing_a_sibling_counts_one_merge_per_save() {
    let (coordinator, _store) = memory_coordinator();
    let observer = coordinator.context_for_current().unwrap();

    let inner = Arc::clone(&coordinator);
    let writer = thread::spawn(move || inner.context_for_current().unwrap())
        .join()
        .unwrap();
    coordinator.observe(&observer, &writer);
    coordinator.observe(&observer, &writer);

    writer.insert("note", titled("sibling"));
    let inner = Arc::clone(&coordinator);
    let writer_clone = Arc::clone(&writer);
    thread::spawn(move || inner.save_sync(&writer_clone).unwrap())
        .join()
        .unwrap();

    assert!(wait_until(
        || observer.merge_count() >= 1,
        Duration::from_secs(5)
    ));
    std::thread::sleep(Duration::from_millis(50));
    observer.queue().run_sync(|| ());
    assert_eq!(observer.merge_count(), 1);
}

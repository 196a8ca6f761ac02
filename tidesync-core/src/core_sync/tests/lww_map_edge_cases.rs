/*
    LWW Map Edge Case Tests

    Tests covering:
    1. Local writes always supersede what is stored
    2. Tombstones merge like ordinary entries and can be resurrected
    3. Malformed entries never touch the map
    4. Concurrent writes produce a conflict on both sides
*/

use crate::core_sync::crdt::{
    ConflictLog, Entry, LWWMap, MergeOutcome, NoopConflictObserver, Resolution, VectorClock,
};
use crate::core_sync::store::errors::SyncError;
use crate::test_utils::{clock, push_all, sync_pair};

#[test]
fn test_local_set_after_remote_merge_dominates() {
    let mut a = LWWMap::new("A");
    let remote = Entry::live("k", b"remote".to_vec(), clock(&[("B", 5)]), "B");
    a.merge_entry(remote, &NoopConflictObserver).unwrap();

    let local = a.set("k", b"local".to_vec(), "A").unwrap().clone();
    assert_eq!(local.clock, clock(&[("A", 1), ("B", 5)]));

    // The local write must win everywhere, including at B
    let mut b = LWWMap::new("B");
    b.merge_entry(
        Entry::live("k", b"remote".to_vec(), clock(&[("B", 5)]), "B"),
        &NoopConflictObserver,
    )
    .unwrap();
    let outcome = b.merge_entry(local, &NoopConflictObserver).unwrap();
    assert_eq!(outcome, MergeOutcome::Applied);
    assert_eq!(b.get("k"), Some(&b"local"[..]));
}

#[test]
fn test_delete_then_set_resurrects() {
    let mut a = LWWMap::new("A");
    a.set("k", b"1".to_vec(), "A").unwrap();
    assert!(a.delete("k", "A").unwrap());
    assert!(!a.contains_key("k"));

    a.set("k", b"2".to_vec(), "A").unwrap();
    assert_eq!(a.get("k"), Some(&b"2"[..]));
    assert_eq!(a.tombstone_count(), 0);
}

#[test]
fn test_remote_resurrection_beats_tombstone() {
    let mut maps = crate::test_utils::replicas(&["A", "B"]);
    maps[0].set("k", b"1".to_vec(), "A").unwrap();
    maps[0].delete("k", "A").unwrap();
    let (a, b) = maps.split_at_mut(1);
    sync_pair(&mut a[0], &mut b[0]);
    assert!(b[0].entry("k").unwrap().deleted);

    // B saw the tombstone, so its set is causally later
    b[0].set("k", b"back".to_vec(), "B").unwrap();
    sync_pair(&mut a[0], &mut b[0]);
    assert_eq!(a[0].get("k"), Some(&b"back"[..]));
}

#[test]
fn test_double_delete_is_noop() {
    let mut a = LWWMap::new("A");
    a.set("k", b"1".to_vec(), "A").unwrap();
    assert!(a.delete("k", "A").unwrap());
    let before = a.clock().clone();

    assert!(!a.delete("k", "A").unwrap());
    assert!(!a.delete("never", "A").unwrap());
    assert_eq!(a.clock(), &before);
}

#[test]
fn test_malformed_entries_rejected_without_side_effects() {
    let mut a = LWWMap::new("A");
    a.set("k", b"1".to_vec(), "A").unwrap();
    let before = a.clone();

    let bad = [
        Entry::live("k", b"x".to_vec(), VectorClock::new(), "B"),
        Entry::live("k", b"x".to_vec(), clock(&[("B", 1)]), ""),
        Entry::live("k", b"x".to_vec(), clock(&[("C", 1)]), "B"),
        Entry::live("", b"x".to_vec(), clock(&[("B", 1)]), "B"),
        Entry {
            value: Some(b"ghost".to_vec()),
            ..Entry::tombstone("k", clock(&[("B", 1)]), "B")
        },
    ];
    for entry in bad {
        let err = a.merge_entry(entry, &NoopConflictObserver).unwrap_err();
        assert!(matches!(err, SyncError::MalformedEntry { .. }), "got {:?}", err);
    }
    assert_eq!(a, before);
}

#[test]
fn test_unknown_device_grows_clock() {
    let mut a = LWWMap::new("A");
    let entry = Entry::live("k", b"v".to_vec(), clock(&[("Z", 3), ("Y", 1)]), "Z");
    a.merge_entry(entry, &NoopConflictObserver).unwrap();

    assert_eq!(a.clock().get("Z"), 3);
    assert_eq!(a.clock().get("Y"), 1);
}

#[test]
fn test_concurrent_write_reported_once_per_side() {
    let mut a = LWWMap::new("A");
    let mut b = LWWMap::new("B");
    a.set("title", b"Draft".to_vec(), "A").unwrap();
    b.set("title", b"Final".to_vec(), "B").unwrap();

    let log_a = ConflictLog::new();
    let log_b = ConflictLog::new();
    let from_b = b.entry("title").unwrap().clone();
    let from_a = a.entry("title").unwrap().clone();

    assert_eq!(
        a.merge_entry(from_b, &log_a).unwrap(),
        MergeOutcome::Conflict(Resolution::IncomingWon)
    );
    assert_eq!(
        b.merge_entry(from_a, &log_b).unwrap(),
        MergeOutcome::Conflict(Resolution::StoredKept)
    );

    let at_a = log_a.drain();
    let at_b = log_b.drain();
    assert_eq!(at_a.len(), 1);
    assert_eq!(at_a[0].winning.writer, "B");
    assert_eq!(at_a, at_b);
}

#[test]
fn test_stale_entry_ignored_but_clock_absorbed() {
    let mut a = LWWMap::new("A");
    let mut b = LWWMap::new("B");
    b.set("k", b"old".to_vec(), "B").unwrap();
    let stale = b.entry("k").unwrap().clone();
    b.set("k", b"new".to_vec(), "B").unwrap();
    push_all(&b, &mut a);

    assert_eq!(a.merge_entry(stale, &NoopConflictObserver).unwrap(), MergeOutcome::Ignored);
    assert_eq!(a.get("k"), Some(&b"new"[..]));
    assert_eq!(a.clock().get("B"), 2);
}

#[test]
fn test_foreign_writer_rejected_locally() {
    let mut a = LWWMap::new("A");
    assert!(matches!(
        a.set("k", b"v".to_vec(), "B"),
        Err(SyncError::InvalidOperation(_))
    ));
    assert!(a.is_empty());
    assert!(a.clock().is_empty());
}

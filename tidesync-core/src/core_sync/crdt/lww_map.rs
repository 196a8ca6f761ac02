/*
    lww_map.rs - Last-Writer-Wins Map CRDT

    A map from string keys to opaque values. Each key holds the single
    entry that wins the last-writer-wins rule among every entry ever
    observed for it, directly or through merges.

    Rules:
    - Local writes tag the entry with the map clock after incrementing the
      owner's counter, so they always dominate what is stored
    - Deletes leave a tombstone that merges like any other entry
    - Incoming entries replace the stored one only if their clock is
      strictly greater, or if clocks are concurrent and the tie-break
      favors them
    - Two different entries carrying the same clock can only come from a
      faulty peer; they go through the tie-break too, so merge stays
      order-independent for any input

    Per key: Absent -> Present -> Tombstoned, with a causally later set
    resurrecting a tombstoned key.
*/

use super::conflict::ConflictObserver;
use super::entry::Entry;
use super::vector_clock::{ClockOrdering, DeviceId, VectorClock};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// How a concurrent write was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    IncomingWon,
    StoredKept,
}

/// Result of merging one incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Incoming entry replaced the stored one (or filled an absent key)
    Applied,
    /// Incoming entry was dominated by or equal to the stored one
    Ignored,
    /// Clocks were concurrent (or equal with different content); the tie-break decided
    Conflict(Resolution),
}

impl MergeOutcome {
    /// True if the stored entry changed
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied | MergeOutcome::Conflict(Resolution::IncomingWon))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeOutcome::Conflict(_))
    }
}

/// Last-Writer-Wins Map CRDT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWMap {
    /// Device owning this replica
    owner: DeviceId,

    /// Current entry per key, tombstones included
    entries: BTreeMap<String, Entry>,

    /// Everything this replica has incorporated
    clock: VectorClock,
}

impl LWWMap {
    /// Create an empty map owned by `owner`
    pub fn new(owner: impl Into<DeviceId>) -> Self {
        LWWMap {
            owner: owner.into(),
            entries: BTreeMap::new(),
            clock: VectorClock::new(),
        }
    }

    /// Rebuild a map from persisted parts, re-validating every entry
    pub(crate) fn from_parts(owner: DeviceId, clock: VectorClock, entries: Vec<Entry>) -> SyncResult<Self> {
        if owner.is_empty() {
            return Err(SyncError::CorruptedData("snapshot has no owner".to_string()));
        }
        let mut map = LWWMap::new(owner);
        for entry in entries {
            entry.validate()?;
            if !clock.dominates(&entry.clock) {
                return Err(SyncError::CorruptedData(format!(
                    "entry '{}' is ahead of the map clock",
                    entry.key
                )));
            }
            map.entries.insert(entry.key.clone(), entry);
        }
        map.clock = clock;
        Ok(map)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The map's own clock
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Write `value` under `key` as device `self_id`
    pub fn set(&mut self, key: &str, value: Vec<u8>, self_id: &str) -> SyncResult<&Entry> {
        self.check_local_write(key, self_id)?;
        self.clock.increment(self_id);
        let entry = Entry::live(key, value, self.clock.clone(), self_id);
        trace!(key, clock = %entry.clock, "local set");
        Ok(self.store(entry))
    }

    /// Tombstone `key` as device `self_id`.
    ///
    /// Returns false (and leaves the clock alone) if the key is absent or
    /// already deleted.
    pub fn delete(&mut self, key: &str, self_id: &str) -> SyncResult<bool> {
        self.check_local_write(key, self_id)?;
        match self.entries.get(key) {
            Some(entry) if !entry.deleted => {}
            _ => return Ok(false),
        }
        self.clock.increment(self_id);
        let entry = Entry::tombstone(key, self.clock.clone(), self_id);
        trace!(key, clock = %entry.clock, "local delete");
        self.store(entry);
        Ok(true)
    }

    fn check_local_write(&self, key: &str, self_id: &str) -> SyncResult<()> {
        if key.is_empty() {
            return Err(SyncError::InvalidOperation("empty key".to_string()));
        }
        if self_id != self.owner {
            return Err(SyncError::InvalidOperation(format!(
                "device {} cannot write to replica owned by {}",
                self_id, self.owner
            )));
        }
        Ok(())
    }

    fn store(&mut self, entry: Entry) -> &Entry {
        let key = entry.key.clone();
        self.entries.insert(key.clone(), entry);
        &self.entries[&key]
    }

    /// Merge one entry received from a peer
    pub fn merge_entry(&mut self, incoming: Entry, observer: &dyn ConflictObserver) -> SyncResult<MergeOutcome> {
        incoming.validate()?;

        let outcome = match self.entries.get(&incoming.key) {
            None => MergeOutcome::Applied,
            Some(stored) => match incoming.clock.compare(&stored.clock) {
                ClockOrdering::Greater => MergeOutcome::Applied,
                ClockOrdering::Less => MergeOutcome::Ignored,
                ClockOrdering::Equal if incoming == *stored => MergeOutcome::Ignored,
                ordering => {
                    if ordering == ClockOrdering::Equal {
                        warn!(key = %incoming.key, clock = %incoming.clock, "two different writes share one clock");
                    }
                    if incoming.tie_break_cmp(stored) == Ordering::Greater {
                        observer.on_conflict(&incoming.key, stored, &incoming);
                        MergeOutcome::Conflict(Resolution::IncomingWon)
                    } else {
                        observer.on_conflict(&incoming.key, &incoming, stored);
                        MergeOutcome::Conflict(Resolution::StoredKept)
                    }
                }
            },
        };

        debug!(key = %incoming.key, writer = %incoming.writer, clock = %incoming.clock, ?outcome, "merged entry");

        self.clock.merge(&incoming.clock);
        if outcome.is_applied() {
            self.entries.insert(incoming.key.clone(), incoming);
        }
        Ok(outcome)
    }

    /// Fold a peer's clock summary into the map clock
    pub(crate) fn absorb_clock(&mut self, summary: &VectorClock) {
        self.clock.merge(summary);
    }

    /// Current entry for `key`, tombstones included
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Live value for `key`
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .get(key)
            .filter(|e| !e.deleted)
            .and_then(|e| e.value.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All entries in key order, tombstones included
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Live `(key, value)` pairs in key order
    pub fn live(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .values()
            .filter(|e| !e.deleted)
            .filter_map(|e| e.value.as_deref().map(|v| (e.key.as_str(), v)))
    }

    /// Tombstones in key order
    pub fn tombstones(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(|e| e.deleted)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| !e.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries, tombstones included
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.entries.values().filter(|e| e.deleted).count()
    }

    /// Physically drop tombstones selected by `eligible`; returns how many were removed
    pub(crate) fn purge_tombstones<F>(&mut self, mut eligible: F) -> usize
    where
        F: FnMut(&Entry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, e| !(e.deleted && eligible(e)));
        before - self.entries.len()
    }

    /// Order-independent equality of the stored entry sets
    pub fn same_entries(&self, other: &LWWMap) -> bool {
        self.entries == other.entries
    }
}

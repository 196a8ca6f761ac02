/*
    reaper.rs - Tombstone garbage collection

    A tombstone can be forgotten once every peer has incorporated the
    deletion; before that, dropping it would let a stale copy of the
    record come back on the next merge.

    Safety over liveness:
    - every device the replica knows of (map clock plus registered peers,
      owner excluded) must have a SyncState
    - every SyncState's last_received_clock must dominate the tombstone clock
    Otherwise nothing is reaped.
*/

use crate::core_sync::crdt::LWWMap;
use crate::core_sync::sync::session::SyncState;
use crate::metrics as sync_metrics;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Purges tombstones every known peer has seen
pub struct TombstoneReaper;

impl TombstoneReaper {
    /// Remove eligible tombstones from `map`; returns how many were removed
    pub fn reap<'a, I>(map: &mut LWWMap, states: I) -> usize
    where
        I: IntoIterator<Item = &'a SyncState>,
    {
        let owner = map.owner().to_string();
        let states: BTreeMap<&str, &SyncState> = states
            .into_iter()
            .filter(|s| s.remote_device != owner)
            .map(|s| (s.remote_device.as_str(), s))
            .collect();

        let mut known: BTreeSet<&str> = map.clock().devices().collect();
        known.extend(states.keys().copied());
        known.remove(owner.as_str());

        if let Some(missing) = known.iter().find(|d| !states.contains_key(*d)) {
            debug!(device = %missing, "device never synced directly; keeping all tombstones");
            return 0;
        }

        let removed = map.purge_tombstones(|tombstone| {
            states
                .values()
                .all(|state| state.last_received_clock.dominates(&tombstone.clock))
        });

        if removed > 0 {
            info!(removed, remaining = map.tombstone_count(), "reaped tombstones");
            sync_metrics::tombstones_reaped(removed);
        }
        sync_metrics::map_size(map.entry_count(), map.tombstone_count());
        removed
    }

    /// Number of tombstones that would be reaped now
    pub fn eligible<'a, I>(map: &LWWMap, states: I) -> usize
    where
        I: IntoIterator<Item = &'a SyncState>,
    {
        let mut trial = map.clone();
        Self::reap(&mut trial, states)
    }
}

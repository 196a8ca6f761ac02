//! Test fixtures for replicas and clocks

use crate::core_sync::crdt::{NoopConflictObserver, LWWMap, VectorClock};
use crate::core_sync::sync::delta::compute_delta;
use crate::core_sync::sync::merge::{MergeEngine, MergeReport};

/// Clock from `(device, counter)` pairs
pub fn clock(pairs: &[(&str, u64)]) -> VectorClock {
    VectorClock::from_counters(pairs.iter().map(|(d, c)| (d.to_string(), *c)))
}

/// One empty replica per device id
pub fn replicas(ids: &[&str]) -> Vec<LWWMap> {
    ids.iter().map(|id| LWWMap::new(*id)).collect()
}

/// Ship everything `from` has into `to`, without session bookkeeping
pub fn push_all(from: &LWWMap, to: &mut LWWMap) -> MergeReport {
    let delta = compute_delta(from, &VectorClock::new());
    MergeEngine::apply_delta(to, &delta, &NoopConflictObserver)
}

/// Bidirectional full exchange between two replicas
pub fn sync_pair(a: &mut LWWMap, b: &mut LWWMap) {
    let to_b = compute_delta(a, &VectorClock::new());
    MergeEngine::apply_delta(b, &to_b, &NoopConflictObserver);
    let to_a = compute_delta(b, &VectorClock::new());
    MergeEngine::apply_delta(a, &to_a, &NoopConflictObserver);
}

/// Pairwise full exchange until every replica has seen every other
pub fn sync_all(maps: &mut [LWWMap]) {
    for i in 0..maps.len() {
        for j in (i + 1)..maps.len() {
            let (left, right) = maps.split_at_mut(j);
            sync_pair(&mut left[i], &mut right[0]);
        }
    }
    // Second pass carries what the later pairs taught the earlier replicas
    for i in 0..maps.len() {
        for j in (i + 1)..maps.len() {
            let (left, right) = maps.split_at_mut(j);
            sync_pair(&mut left[i], &mut right[0]);
        }
    }
}

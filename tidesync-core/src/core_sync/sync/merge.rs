/*
    merge.rs - Stateless delta application

    Applies every entry of an incoming delta to a local map. A malformed
    entry is rejected and skipped; the rest of the delta still applies,
    since CRDT merge is safe to apply partially and retry later.

    When every entry validates, the sender's clock summary is folded into
    the map clock as well: entries the sender dropped in favor of a
    concurrent winner are superseded here too, and replicas that have seen
    the same history end with identical clocks.
*/

use crate::core_sync::crdt::{ConflictObserver, LWWMap, MergeOutcome, Resolution};
use crate::core_sync::store::errors::SyncError;
use crate::core_sync::sync::delta::Delta;
use crate::metrics as sync_metrics;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// An entry excluded from a merge
#[derive(Debug)]
pub struct RejectedEntry {
    pub key: String,
    pub error: SyncError,
}

/// Per-entry results of applying one delta
#[derive(Debug, Default)]
pub struct MergeReport {
    /// `(key, outcome)` in delta order
    pub outcomes: Vec<(String, MergeOutcome)>,

    /// Entries that failed validation
    pub rejected: Vec<RejectedEntry>,

    /// Devices first learned about through this delta
    pub new_devices: Vec<String>,
}

impl MergeReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_applied()).count()
    }

    pub fn ignored(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| !o.is_applied()).count()
    }

    pub fn conflicts(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_conflict()).count()
    }

    /// Outcome recorded for `key`, if the delta carried it
    pub fn outcome_for(&self, key: &str) -> Option<MergeOutcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| *o)
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Stateless merge orchestrator
pub struct MergeEngine;

impl MergeEngine {
    /// Merge every entry of `delta` into `map`
    pub fn apply_delta(map: &mut LWWMap, delta: &Delta, observer: &dyn ConflictObserver) -> MergeReport {
        let known: BTreeSet<String> = map.clock().devices().map(str::to_string).collect();
        let mut report = MergeReport::default();

        for entry in &delta.entries {
            let key = entry.key.clone();
            match map.merge_entry(entry.clone(), observer) {
                Ok(outcome) => {
                    sync_metrics::merge_outcome(outcome);
                    report.outcomes.push((key, outcome));
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "rejecting entry from delta");
                    sync_metrics::malformed_entry();
                    report.rejected.push(RejectedEntry { key, error });
                }
            }
        }

        // A clean delta brings us everything the sender had incorporated
        if report.rejected.is_empty() && !delta.sender_clock_summary.has_zero_counter() {
            map.absorb_clock(&delta.sender_clock_summary);
        }

        report.new_devices = map
            .clock()
            .devices()
            .filter(|d| !known.contains(*d))
            .map(str::to_string)
            .collect();
        if !report.new_devices.is_empty() {
            debug!(devices = ?report.new_devices, "clock grew to include new devices");
        }

        sync_metrics::map_size(map.entry_count(), map.tombstone_count());
        report
    }

    /// Count of conflicts settled in favor of the incoming entry
    pub fn incoming_wins(report: &MergeReport) -> usize {
        report
            .outcomes
            .iter()
            .filter(|(_, o)| *o == MergeOutcome::Conflict(Resolution::IncomingWon))
            .count()
    }
}

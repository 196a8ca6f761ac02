//! Metrics for sync observability
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

use crate::core_sync::crdt::{MergeOutcome, Resolution};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::{Duration, Instant};

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Merge metrics
    describe_counter!("tidesync_merge_outcomes_total", "Entries merged from deltas, by outcome");
    describe_counter!("tidesync_conflicts_total", "Concurrent writes resolved by last-writer-wins");
    describe_counter!("tidesync_malformed_entries_total", "Incoming entries rejected by validation");
    describe_histogram!("tidesync_delta_entries", "Entries per outgoing delta");

    // Replica metrics
    describe_gauge!("tidesync_map_entries", "Entries stored in the local map, tombstones included");
    describe_gauge!("tidesync_map_tombstones", "Tombstones stored in the local map");
    describe_counter!("tidesync_tombstones_reaped_total", "Tombstones purged by the reaper");

    // Exchange metrics
    describe_gauge!("tidesync_known_peers", "Devices with a sync session");
    describe_counter!("tidesync_exchange_attempts_total", "Exchange attempts, by result");
    describe_histogram!("tidesync_exchange_duration_seconds", "Wall time of one exchange attempt");
}

/// Record the outcome of one merged entry
pub fn merge_outcome(outcome: MergeOutcome) {
    let label = match outcome {
        MergeOutcome::Applied => "applied",
        MergeOutcome::Ignored => "ignored",
        MergeOutcome::Conflict(_) => "conflict",
    };
    counter!("tidesync_merge_outcomes_total", "outcome" => label).increment(1);

    if let MergeOutcome::Conflict(resolution) = outcome {
        let resolution = match resolution {
            Resolution::IncomingWon => "incoming_won",
            Resolution::StoredKept => "stored_kept",
        };
        counter!("tidesync_conflicts_total", "resolution" => resolution).increment(1);
    }
}

pub fn malformed_entry() {
    counter!("tidesync_malformed_entries_total").increment(1);
}

/// Current map size, tombstones included
pub fn map_size(entries: usize, tombstones: usize) {
    gauge!("tidesync_map_entries").set(entries as f64);
    gauge!("tidesync_map_tombstones").set(tombstones as f64);
}

pub fn tombstones_reaped(removed: usize) {
    counter!("tidesync_tombstones_reaped_total").increment(removed as u64);
}

pub fn known_peers(count: usize) {
    gauge!("tidesync_known_peers").set(count as f64);
}

pub fn delta_entries(count: usize) {
    histogram!("tidesync_delta_entries").record(count as f64);
}

/// Record one exchange attempt and how long it took
pub fn exchange_attempt(success: bool, elapsed: Duration) {
    let result = if success { "success" } else { "failure" };
    counter!("tidesync_exchange_attempts_total", "result" => result).increment(1);
    histogram!("tidesync_exchange_duration_seconds").record(elapsed.as_secs_f64());
}

/// Timer for one exchange attempt
pub struct ExchangeTimer {
    start: Instant,
}

impl ExchangeTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Stop the timer and record the attempt
    pub fn stop(self, success: bool) -> Duration {
        let elapsed = self.start.elapsed();
        exchange_attempt(success, elapsed);
        elapsed
    }
}

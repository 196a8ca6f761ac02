/*
    conflict.rs - Conflict notification sink

    Invoked synchronously whenever a merge meets two causally concurrent
    entries for the same key and the last-writer-wins rule picks one.
    The engine never depends on what the host does with the callback.
*/

use super::entry::Entry;
use std::sync::Mutex;
use tracing::info;

/// Host hook for last-writer-wins overwrites
pub trait ConflictObserver: Send + Sync {
    fn on_conflict(&self, key: &str, losing: &Entry, winning: &Entry);
}

impl<F> ConflictObserver for F
where
    F: Fn(&str, &Entry, &Entry) + Send + Sync,
{
    fn on_conflict(&self, key: &str, losing: &Entry, winning: &Entry) {
        self(key, losing, winning)
    }
}

/// Ignores every conflict
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConflictObserver;

impl ConflictObserver for NoopConflictObserver {
    fn on_conflict(&self, _key: &str, _losing: &Entry, _winning: &Entry) {}
}

/// Logs every conflict through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingConflictObserver;

impl ConflictObserver for LoggingConflictObserver {
    fn on_conflict(&self, key: &str, losing: &Entry, winning: &Entry) {
        info!(
            key,
            winner = %winning.writer,
            winner_clock = %winning.clock,
            winner_hash = %winning.short_hash(),
            loser = %losing.writer,
            loser_clock = %losing.clock,
            loser_hash = %losing.short_hash(),
            "concurrent write resolved by last-writer-wins"
        );
    }
}

/// A recorded conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub key: String,
    pub losing: Entry,
    pub winning: Entry,
}

/// Keeps every conflict in memory so a host can surface them later
#[derive(Debug, Default)]
pub struct ConflictLog {
    records: Mutex<Vec<ConflictRecord>>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<ConflictRecord> {
        match self.records.lock() {
            Ok(mut records) => std::mem::take(&mut *records),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConflictObserver for ConflictLog {
    fn on_conflict(&self, key: &str, losing: &Entry, winning: &Entry) {
        let record = ConflictRecord {
            key: key.to_string(),
            losing: losing.clone(),
            winning: winning.clone(),
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

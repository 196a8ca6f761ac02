/*
    core_sync - Offline-first state synchronization

    Each device keeps a full replica of a key-value map and edits it while
    disconnected. When two devices reconnect they swap deltas and converge.
    Handles:
    - Causality tracking (vector clocks)
    - Last-writer-wins map with tombstones
    - Delta computation and merge
    - Per-peer sync sessions and tombstone reaping
    - Snapshots for restart
*/

pub mod crdt;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use crdt::{ClockOrdering, ConflictObserver, DeviceId, Entry, LWWMap, MergeOutcome, VectorClock};
pub use store::{SyncError, SyncResult};
pub use sync::{Delta, DeltaComputer, MergeEngine, MergeReport, SyncEngine, SyncSession, SyncState};

//! tidesync: offline-first state synchronization
//!
//! Devices keep full replicas of a key-value map, edit them while
//! disconnected and converge by exchanging deltas when they reconnect.
//! Causality is tracked with vector clocks; concurrent writes to one key
//! are settled by a deterministic last-writer-wins rule.

pub mod config;
pub mod core_sync;
pub mod logging;
pub mod metrics;
#[doc(hidden)]
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_sync::crdt::{ConflictLog, LoggingConflictObserver, NoopConflictObserver};
pub use core_sync::store::snapshot::{load_snapshot, save_snapshot};
pub use core_sync::sync::{LoopbackTransport, RetryPolicy, SyncDriver, Transport};
pub use core_sync::{
    ClockOrdering, ConflictObserver, Delta, DeviceId, Entry, LWWMap, MergeOutcome, SyncEngine, SyncError,
    SyncResult, SyncState, VectorClock,
};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let engine = SyncEngine::new("device").unwrap();
        assert_eq!(engine.device_id(), "device");
    }
}

/*
    CRDT subsystem - Replicated data types

    Vector clocks order writes; the LWW map keeps one winning entry per key.
*/

pub mod conflict;
pub mod entry;
pub mod lww_map;
pub mod vector_clock;

pub use conflict::{
    ConflictLog, ConflictObserver, ConflictRecord, LoggingConflictObserver, NoopConflictObserver,
};
pub use entry::{Entry, ValueHash};
pub use lww_map::{LWWMap, MergeOutcome, Resolution};
pub use vector_clock::{ClockOrdering, DeviceId, VectorClock};

/*
    Sync subsystem - Exchange deltas between replicas

    Computes, ships and applies deltas, and tracks what each peer has seen.
*/

pub mod delta;
pub mod driver;
pub mod engine;
pub mod merge;
pub mod reaper;
pub mod session;
pub mod transport;

pub use delta::{compute_delta, Delta, DeltaComputer};
pub use driver::{RetryPolicy, RoundSummary, SyncDriver, SyncSummary};
pub use engine::SyncEngine;
pub use merge::{MergeEngine, MergeReport, RejectedEntry};
pub use reaper::TombstoneReaper;
pub use session::{ExchangeOutcome, SyncSession, SyncState};
pub use transport::{LoopbackTransport, SyncRequest, Transport, TransportError};

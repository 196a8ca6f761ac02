/*
    delta.rs - Delta computation and wire codec

    A delta is the set of entries a peer has not necessarily seen: every
    entry whose clock is not dominated by the clock the peer last
    acknowledged. Entries are emitted in key order so identical inputs give
    identical bytes.

    Wire format (JSON):
    {
      "entries": [{"key", "value" | null, "deleted", "clock": {device: n}, "writer"}],
      "sender_clock_summary": {device: n}
    }

    A compact bincode form is also provided for transports that prefer it.
*/

use crate::core_sync::crdt::{ClockOrdering, Entry, LWWMap, VectorClock};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Entries a peer is missing, plus what the sender had incorporated
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Delta {
    pub entries: Vec<Entry>,
    pub sender_clock_summary: VectorClock,
}

impl Delta {
    /// A delta carrying nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Pointwise maximum over the clocks of all carried entries
    pub fn max_clock(&self) -> VectorClock {
        let mut max = VectorClock::new();
        for entry in &self.entries {
            max.merge(&entry.clock);
        }
        max
    }

    /// Encode to the JSON wire format
    pub fn to_json(&self) -> SyncResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Decode from the JSON wire format
    pub fn from_json(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Deserialization(e.to_string()))
    }

    /// Encode to compact binary
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Decode from compact binary
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SyncError::Deserialization(e.to_string()))
    }
}

/// Derives the entries changed since a given clock
pub struct DeltaComputer;

impl DeltaComputer {
    /// Every entry whose clock is Greater than or Concurrent with `since`
    pub fn compute_delta(map: &LWWMap, since: &VectorClock) -> Delta {
        let entries = map
            .entries()
            .filter(|entry| {
                matches!(
                    entry.clock.compare(since),
                    ClockOrdering::Greater | ClockOrdering::Concurrent
                )
            })
            .cloned()
            .collect();

        Delta {
            entries,
            sender_clock_summary: map.clock().clone(),
        }
    }
}

/// Shorthand for [`DeltaComputer::compute_delta`]
pub fn compute_delta(map: &LWWMap, since: &VectorClock) -> Delta {
    DeltaComputer::compute_delta(map, since)
}

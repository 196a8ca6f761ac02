/*
    entry.rs - A single replicated record

    Each key of the LWW map holds exactly one Entry: the value (or a
    tombstone), the vector clock of the write, and the writer's device id.
    Concurrent writes are ordered by clock total, then writer, then a hash
    of the value.
*/

use super::vector_clock::{DeviceId, VectorClock};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Hash of an entry value used by the concurrent-write tie-break
pub type ValueHash = [u8; 32];

/// One logical record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,

    /// Opaque value; `None` for tombstones
    pub value: Option<Vec<u8>>,

    /// Clock of the write that produced this entry
    pub clock: VectorClock,

    /// Deletion marker
    pub deleted: bool,

    /// Device that authored the write
    pub writer: DeviceId,
}

impl Entry {
    /// A live entry
    pub fn live(key: impl Into<String>, value: Vec<u8>, clock: VectorClock, writer: impl Into<DeviceId>) -> Self {
        Entry {
            key: key.into(),
            value: Some(value),
            clock,
            deleted: false,
            writer: writer.into(),
        }
    }

    /// A tombstone: value cleared, clock and writer kept so it merges like any entry
    pub fn tombstone(key: impl Into<String>, clock: VectorClock, writer: impl Into<DeviceId>) -> Self {
        Entry {
            key: key.into(),
            value: None,
            clock,
            deleted: true,
            writer: writer.into(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// blake3 of the value bytes (empty input for tombstones)
    pub fn value_hash(&self) -> ValueHash {
        let bytes = self.value.as_deref().unwrap_or(&[]);
        *blake3::hash(bytes).as_bytes()
    }

    /// Check the structural invariants an entry must satisfy before it may be merged
    pub fn validate(&self) -> SyncResult<()> {
        if self.key.is_empty() {
            return Err(SyncError::malformed(&self.key, "empty key"));
        }
        if self.writer.is_empty() {
            return Err(SyncError::malformed(&self.key, "missing writer"));
        }
        if self.clock.is_empty() {
            return Err(SyncError::malformed(&self.key, "clock references no devices"));
        }
        if self.clock.has_zero_counter() {
            return Err(SyncError::malformed(&self.key, "clock contains a zero counter"));
        }
        if self.clock.get(&self.writer) == 0 {
            return Err(SyncError::malformed(
                &self.key,
                format!("writer {} absent from its own clock", self.writer),
            ));
        }
        match (self.deleted, self.value.is_some()) {
            (true, true) => Err(SyncError::malformed(&self.key, "tombstone carries a value")),
            (false, false) => Err(SyncError::malformed(&self.key, "live entry without a value")),
            _ => Ok(()),
        }
    }

    /// Total order used between entries with concurrent clocks.
    ///
    /// Clock total comes first, which keeps the order consistent with
    /// dominance and therefore transitive across any number of writers.
    /// Among equal totals `(writer, value_hash)` decides; deleted flag and
    /// the sorted clock only separate entries that share both.
    pub fn tie_break_cmp(&self, other: &Entry) -> Ordering {
        self.clock
            .total()
            .cmp(&other.clock.total())
            .then_with(|| self.writer.cmp(&other.writer))
            .then_with(|| self.value_hash().cmp(&other.value_hash()))
            .then_with(|| self.deleted.cmp(&other.deleted))
            .then_with(|| self.clock.iter().cmp(other.clock.iter()))
    }

    /// Short hex form of the value hash for logs
    pub fn short_hash(&self) -> String {
        hex::encode(&self.value_hash()[..6])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_counters(pairs.iter().map(|(d, c)| (d.to_string(), *c)))
    }

    #[test]
    fn test_live_entry_validates() {
        let entry = Entry::live("title", b"Draft".to_vec(), clock(&[("A", 1)]), "A");
        assert!(entry.validate().is_ok());
        assert!(!entry.is_tombstone());
    }

    #[test]
    fn test_tombstone_validates() {
        let entry = Entry::tombstone("title", clock(&[("A", 2)]), "A");
        assert!(entry.validate().is_ok());
        assert!(entry.is_tombstone());
        assert!(entry.value.is_none());
    }

    #[test]
    fn test_missing_writer_rejected() {
        let entry = Entry::live("title", b"x".to_vec(), clock(&[("A", 1)]), "");
        let err = entry.validate().unwrap_err();
        assert!(matches!(err, SyncError::MalformedEntry { .. }));
        assert!(err.to_string().contains("missing writer"));
    }

    #[test]
    fn test_empty_clock_rejected() {
        let entry = Entry::live("title", b"x".to_vec(), VectorClock::new(), "A");
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_writer_must_appear_in_clock() {
        let entry = Entry::live("title", b"x".to_vec(), clock(&[("B", 1)]), "A");
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_zero_counter_rejected() {
        let decoded: VectorClock = serde_json::from_str(r#"{"A":1,"B":0}"#).unwrap();
        let entry = Entry::live("title", b"x".to_vec(), decoded, "A");
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_value_flag_mismatch_rejected() {
        let mut entry = Entry::tombstone("k", clock(&[("A", 1)]), "A");
        entry.value = Some(b"ghost".to_vec());
        assert!(entry.validate().is_err());

        let mut entry = Entry::live("k", b"v".to_vec(), clock(&[("A", 1)]), "A");
        entry.value = None;
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_tie_break_prefers_larger_writer() {
        let a = Entry::live("title", b"Draft".to_vec(), clock(&[("A", 1)]), "A");
        let b = Entry::live("title", b"Final".to_vec(), clock(&[("B", 1)]), "B");
        assert_eq!(b.tie_break_cmp(&a), Ordering::Greater);
        assert_eq!(a.tie_break_cmp(&b), Ordering::Less);
    }

    #[test]
    fn test_tie_break_same_writer_uses_hash() {
        let x = Entry::live("k", b"x".to_vec(), clock(&[("A", 2), ("B", 1)]), "A");
        let y = Entry::live("k", b"y".to_vec(), clock(&[("A", 1), ("B", 2)]), "A");
        let expected = x.value_hash().cmp(&y.value_hash());
        assert_eq!(x.tie_break_cmp(&y), expected);
        assert_eq!(y.tie_break_cmp(&x), expected.reverse());
    }

    #[test]
    fn test_tie_break_longer_history_wins() {
        // A rewrote C's value; B wrote concurrently with both
        let c = Entry::live("k", b"c".to_vec(), clock(&[("C", 1)]), "C");
        let a = Entry::live("k", b"a".to_vec(), clock(&[("A", 1), ("C", 1)]), "A");
        let b = Entry::live("k", b"b".to_vec(), clock(&[("B", 1)]), "B");

        assert_eq!(a.tie_break_cmp(&b), Ordering::Greater);
        assert_eq!(c.tie_break_cmp(&b), Ordering::Greater);
        assert_eq!(a.tie_break_cmp(&c), Ordering::Greater);
    }

    #[test]
    fn test_tombstone_hash_is_empty_input_hash() {
        let t = Entry::tombstone("k", clock(&[("A", 1)]), "A");
        assert_eq!(t.value_hash(), *blake3::hash(&[]).as_bytes());
        assert_eq!(t.short_hash().len(), 12);
    }
}

/*
    vector_clock.rs - Vector clock implementation for causal ordering

    A vector clock tracks the logical time across devices.
    Used to determine causal relationships between writes:
    - Happened-before (Less)
    - Happened-after (Greater)
    - Identical (Equal)
    - Concurrent (neither dominates)

    Comparison is an explicit four-way result so callers must handle
    Concurrent instead of leaning on a total-order operator.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a replica (one per installation)
pub type DeviceId = String;

/// Result of comparing two vector clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockOrdering {
    /// Left causally precedes right
    Less,
    /// Left causally follows right
    Greater,
    /// Identical histories
    Equal,
    /// Neither dominates: a true conflict
    Concurrent,
}

impl ClockOrdering {
    /// Swap the sides of the comparison
    pub fn reverse(self) -> Self {
        match self {
            ClockOrdering::Less => ClockOrdering::Greater,
            ClockOrdering::Greater => ClockOrdering::Less,
            other => other,
        }
    }
}

/// Vector clock for tracking causal order
///
/// Counters are kept in a `BTreeMap` so two clocks with the same content
/// serialize to identical bytes. A missing device reads as zero and zero
/// counters are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clock: BTreeMap<DeviceId, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock
    pub fn new() -> Self {
        VectorClock { clock: BTreeMap::new() }
    }

    /// Build a clock from `(device, counter)` pairs, dropping zero counters
    pub fn from_counters<I, S>(counters: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<DeviceId>,
    {
        let mut vc = VectorClock::new();
        for (device, counter) in counters {
            vc.set(&device.into(), counter);
        }
        vc
    }

    /// Increment the counter for `device_id` in place
    pub fn increment(&mut self, device_id: &str) {
        let counter = self.clock.entry(device_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Return a copy of this clock with `device_id` incremented
    pub fn incremented(&self, device_id: &str) -> VectorClock {
        let mut next = self.clone();
        next.increment(device_id);
        next
    }

    /// Get the counter for a device (zero if never seen)
    pub fn get(&self, device_id: &str) -> u64 {
        self.clock.get(device_id).copied().unwrap_or(0)
    }

    /// Set the counter for a device; zero removes it
    pub fn set(&mut self, device_id: &str, counter: u64) {
        if counter == 0 {
            self.clock.remove(device_id);
        } else {
            self.clock.insert(device_id.to_string(), counter);
        }
    }

    /// Merge another clock into this one (pointwise maximum)
    pub fn merge(&mut self, other: &VectorClock) {
        for (device_id, &counter) in &other.clock {
            let current = self.clock.entry(device_id.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Pointwise maximum of two clocks as a new value
    pub fn merged(a: &VectorClock, b: &VectorClock) -> VectorClock {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    /// Compare two vector clocks
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        for (device_id, &mine) in &self.clock {
            let theirs = other.get(device_id);
            if mine < theirs {
                less = true;
            } else if mine > theirs {
                greater = true;
            }
        }

        for (device_id, &theirs) in &other.clock {
            if !self.clock.contains_key(device_id) && theirs > 0 {
                less = true;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Less,
            (false, true) => ClockOrdering::Greater,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True if this clock is greater than or equal to `other`
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), ClockOrdering::Greater | ClockOrdering::Equal)
    }

    /// True if this clock strictly precedes `other`
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Less
    }

    /// True if neither clock dominates the other
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Devices with a non-zero counter, in id order
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.clock.keys().map(String::as_str)
    }

    /// `(device, counter)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.clock.iter().map(|(device, &counter)| (device.as_str(), counter))
    }

    /// Check if clock is empty
    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    /// Get the number of devices tracked
    pub fn len(&self) -> usize {
        self.clock.len()
    }

    /// Sum of all counters. Strictly grows along every causal chain, so it
    /// orders dominated clocks before the clocks that dominate them.
    pub fn total(&self) -> u64 {
        self.clock.values().fold(0u64, |acc, &c| acc.saturating_add(c))
    }

    /// True if any stored counter is zero (only possible after decoding foreign bytes)
    pub(crate) fn has_zero_counter(&self) -> bool {
        self.clock.values().any(|&counter| counter == 0)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (device, counter)) in self.clock.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", device, counter)?;
        }
        write!(f, "}}")
    }
}

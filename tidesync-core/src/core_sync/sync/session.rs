/*
    session.rs - Per-peer sync bookkeeping

    A SyncSession owns the SyncState for one remote device and drives the
    bidirectional exchange:

    1. merge the incoming delta into the local map
    2. fold the incoming clocks into last_received_clock
    3. compute the outgoing delta since last_sent_clock
    4. hold the local clock as pending until the transport confirms
       delivery, then commit it as last_sent_clock

    Each direction commits independently, so an exchange aborted midway
    leaves no partial state: a dropped send is simply recomputed next time.

    The responder of a request/response round trip cannot learn whether its
    reply arrived, so it never commits anything for it. Its reply is built
    from the clock summary the initiator sent, i.e. from what the initiator
    has actually incorporated, and a lost reply is rebuilt on the next
    request.
*/

use crate::core_sync::crdt::{ConflictObserver, DeviceId, LWWMap, VectorClock};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use crate::core_sync::sync::delta::{compute_delta, Delta};
use crate::core_sync::sync::merge::{MergeEngine, MergeReport};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What this replica knows about one remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub remote_device: DeviceId,

    /// Local clock as of the last outgoing delta the peer confirmed
    pub last_sent_clock: VectorClock,

    /// Everything the peer is known to have incorporated
    pub last_received_clock: VectorClock,
}

impl SyncState {
    /// State for a device contacted for the first time
    pub fn new(remote_device: impl Into<DeviceId>) -> Self {
        SyncState {
            remote_device: remote_device.into(),
            last_sent_clock: VectorClock::new(),
            last_received_clock: VectorClock::new(),
        }
    }
}

/// Result of the local half of an exchange
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub report: MergeReport,
    pub outgoing: Delta,
}

/// Exchange driver for one peer
#[derive(Debug, Clone)]
pub struct SyncSession {
    state: SyncState,

    /// Clock to commit as last_sent once delivery is confirmed
    pending_sent: Option<VectorClock>,
}

impl SyncSession {
    pub fn new(remote_device: impl Into<DeviceId>) -> Self {
        Self::from_state(SyncState::new(remote_device))
    }

    pub fn from_state(state: SyncState) -> Self {
        SyncSession { state, pending_sent: None }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn peer(&self) -> &str {
        &self.state.remote_device
    }

    pub fn is_in_flight(&self) -> bool {
        self.pending_sent.is_some()
    }

    /// Merge `incoming`, then produce the delta the peer is missing.
    ///
    /// `last_sent_clock` is not advanced here; call [`confirm_sent`] once
    /// the transport reports delivery.
    ///
    /// [`confirm_sent`]: SyncSession::confirm_sent
    pub fn exchange(
        &mut self,
        map: &mut LWWMap,
        incoming: &Delta,
        observer: &dyn ConflictObserver,
    ) -> SyncResult<ExchangeOutcome> {
        if self.is_in_flight() {
            return Err(SyncError::ExchangeInProgress(self.state.remote_device.clone()));
        }
        let report = self.receive(map, incoming, observer);
        let outgoing = self.begin_send(map)?;
        Ok(ExchangeOutcome { report, outgoing })
    }

    /// Responder half of a round trip: merge `incoming`, then answer with
    /// every entry the initiator's clock summary does not cover.
    ///
    /// Nothing is left pending and `last_sent_clock` is untouched.
    pub fn reply(
        &mut self,
        map: &mut LWWMap,
        incoming: &Delta,
        observer: &dyn ConflictObserver,
    ) -> SyncResult<ExchangeOutcome> {
        if self.is_in_flight() {
            return Err(SyncError::ExchangeInProgress(self.state.remote_device.clone()));
        }
        let report = self.receive(map, incoming, observer);
        let outgoing = compute_delta(map, &incoming.sender_clock_summary);
        Ok(ExchangeOutcome { report, outgoing })
    }

    /// Steps 1-2 only: merge an incoming delta and record what the peer has
    pub fn receive(&mut self, map: &mut LWWMap, incoming: &Delta, observer: &dyn ConflictObserver) -> MergeReport {
        let report = MergeEngine::apply_delta(map, incoming, observer);

        let mut seen = VectorClock::new();
        for entry in &incoming.entries {
            if entry.validate().is_ok() {
                seen.merge(&entry.clock);
            }
        }
        seen.merge(&incoming.sender_clock_summary);
        self.state.last_received_clock.merge(&seen);

        debug!(
            peer = %self.state.remote_device,
            applied = report.applied(),
            rejected = report.rejected.len(),
            last_received = %self.state.last_received_clock,
            "received delta"
        );
        report
    }

    /// Step 3: compute the outgoing delta and mark it pending
    pub fn begin_send(&mut self, map: &LWWMap) -> SyncResult<Delta> {
        if self.is_in_flight() {
            return Err(SyncError::ExchangeInProgress(self.state.remote_device.clone()));
        }
        let outgoing = compute_delta(map, &self.state.last_sent_clock);
        self.pending_sent = Some(map.clock().clone());
        Ok(outgoing)
    }

    /// Step 4: the peer durably received the outgoing delta
    pub fn confirm_sent(&mut self) -> SyncResult<()> {
        let clock = self
            .pending_sent
            .take()
            .ok_or_else(|| SyncError::NoExchangeInFlight(self.state.remote_device.clone()))?;
        self.state.last_sent_clock.merge(&clock);
        debug!(peer = %self.state.remote_device, last_sent = %self.state.last_sent_clock, "delivery confirmed");
        Ok(())
    }

    /// Drop the pending send; the next exchange resends from the old clock
    pub fn abort(&mut self) -> SyncResult<()> {
        self.pending_sent
            .take()
            .map(|_| ())
            .ok_or_else(|| SyncError::NoExchangeInFlight(self.state.remote_device.clone()))
    }
}

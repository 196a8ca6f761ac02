/*
    engine.rs - Thread-safe facade over one replica

    The LWWMap is the only shared mutable resource. Local writes and merges
    run under its write lock because set/merge read and then write the
    clock. Each peer's SyncSession sits in a separate table; at most one
    exchange per peer is in flight, while different peers may exchange
    concurrently against the same map.

    Lock order is always sessions -> map.
*/

use crate::core_sync::crdt::{
    ConflictObserver, DeviceId, Entry, LWWMap, LoggingConflictObserver, VectorClock,
};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use crate::core_sync::store::snapshot::{self, ReplicaSnapshot};
use crate::core_sync::sync::delta::{compute_delta, Delta};
use crate::core_sync::sync::merge::MergeReport;
use crate::core_sync::sync::reaper::TombstoneReaper;
use crate::core_sync::sync::session::{ExchangeOutcome, SyncSession, SyncState};
use crate::metrics as sync_metrics;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Helper to convert poison errors into SyncError
fn handle_poison<T>(_err: PoisonError<T>) -> SyncError {
    SyncError::Storage("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// One device's replica plus its per-peer sync state
pub struct SyncEngine {
    device_id: DeviceId,
    map: RwLock<LWWMap>,
    sessions: Mutex<BTreeMap<DeviceId, SyncSession>>,
    observer: Arc<dyn ConflictObserver>,
}

impl SyncEngine {
    /// Fresh, empty replica for `device_id`
    pub fn new(device_id: impl Into<DeviceId>) -> SyncResult<Self> {
        let device_id = device_id.into();
        if device_id.is_empty() {
            return Err(SyncError::InvalidOperation("empty device id".to_string()));
        }
        let map = LWWMap::new(device_id.clone());
        Ok(Self::assemble(device_id, map, Vec::new()))
    }

    /// Rebuild a replica from bytes written by [`SyncEngine::save_state`]
    /// or [`snapshot::save_snapshot`]
    pub fn restore(device_id: impl Into<DeviceId>, bytes: &[u8]) -> SyncResult<Self> {
        let device_id = device_id.into();
        let ReplicaSnapshot { map, peers } = snapshot::load_replica(bytes)?;
        if map.owner() != device_id {
            return Err(SyncError::InvalidOperation(format!(
                "snapshot belongs to {}, not {}",
                map.owner(),
                device_id
            )));
        }
        info!(device = %device_id, entries = map.entry_count(), peers = peers.len(), "restored replica");
        Ok(Self::assemble(device_id, map, peers))
    }

    fn assemble(device_id: DeviceId, map: LWWMap, peers: Vec<SyncState>) -> Self {
        let sessions = peers
            .into_iter()
            .map(|state| (state.remote_device.clone(), SyncSession::from_state(state)))
            .collect();
        SyncEngine {
            device_id,
            map: RwLock::new(map),
            sessions: Mutex::new(sessions),
            observer: Arc::new(LoggingConflictObserver),
        }
    }

    /// Replace the conflict observer
    pub fn with_observer(mut self, observer: Arc<dyn ConflictObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // --- local mutation -------------------------------------------------

    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> SyncResult<()> {
        let mut map = self.map.write().map_err(handle_poison)?;
        map.set(key, value.into(), &self.device_id)?;
        Ok(())
    }

    /// Tombstone `key`; false if there was no live value
    pub fn delete(&self, key: &str) -> SyncResult<bool> {
        let mut map = self.map.write().map_err(handle_poison)?;
        map.delete(key, &self.device_id)
    }

    // --- reads ----------------------------------------------------------

    pub fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let map = self.map.read().map_err(handle_poison)?;
        Ok(map.get(key).map(<[u8]>::to_vec))
    }

    pub fn entry(&self, key: &str) -> SyncResult<Option<Entry>> {
        let map = self.map.read().map_err(handle_poison)?;
        Ok(map.entry(key).cloned())
    }

    pub fn clock(&self) -> SyncResult<VectorClock> {
        let map = self.map.read().map_err(handle_poison)?;
        Ok(map.clock().clone())
    }

    /// Point-in-time copy of the whole map
    pub fn map_snapshot(&self) -> SyncResult<LWWMap> {
        let map = self.map.read().map_err(handle_poison)?;
        Ok(map.clone())
    }

    /// Delta since an arbitrary clock, without touching any session
    pub fn delta_since(&self, since: &VectorClock) -> SyncResult<Delta> {
        let map = self.map.read().map_err(handle_poison)?;
        Ok(compute_delta(&map, since))
    }

    // --- peers ----------------------------------------------------------

    /// Make a device known before it is first contacted
    pub fn register_peer(&self, peer: &str) -> SyncResult<()> {
        self.check_peer(peer)?;
        let mut sessions = self.sessions.lock().map_err(handle_poison)?;
        sessions.entry(peer.to_string()).or_insert_with(|| SyncSession::new(peer));
        sync_metrics::known_peers(sessions.len());
        Ok(())
    }

    pub fn sync_state(&self, peer: &str) -> SyncResult<Option<SyncState>> {
        let sessions = self.sessions.lock().map_err(handle_poison)?;
        Ok(sessions.get(peer).map(|s| s.state().clone()))
    }

    pub fn sync_states(&self) -> SyncResult<Vec<SyncState>> {
        let sessions = self.sessions.lock().map_err(handle_poison)?;
        Ok(sessions.values().map(|s| s.state().clone()).collect())
    }

    fn check_peer(&self, peer: &str) -> SyncResult<()> {
        if peer.is_empty() || peer == self.device_id {
            return Err(SyncError::InvalidOperation(format!("invalid peer '{}'", peer)));
        }
        Ok(())
    }

    fn with_session<R>(
        &self,
        peer: &str,
        f: impl FnOnce(&mut SyncSession, &mut LWWMap) -> SyncResult<R>,
    ) -> SyncResult<R> {
        self.check_peer(peer)?;
        let mut sessions = self.sessions.lock().map_err(handle_poison)?;
        if !sessions.contains_key(peer) {
            debug!(peer, "first contact with device");
            sessions.insert(peer.to_string(), SyncSession::new(peer));
            sync_metrics::known_peers(sessions.len());
        }
        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| SyncError::Storage(format!("session for {} vanished", peer)))?;
        let mut map = self.map.write().map_err(handle_poison)?;
        f(session, &mut *map)
    }

    // --- exchange -------------------------------------------------------

    /// Merge `incoming` from `peer` and compute what the peer is missing.
    ///
    /// The returned delta stays pending until [`confirm_delivery`] or
    /// [`abort_exchange`] is called for the same peer.
    ///
    /// [`confirm_delivery`]: SyncEngine::confirm_delivery
    /// [`abort_exchange`]: SyncEngine::abort_exchange
    pub fn exchange(&self, peer: &str, incoming: &Delta) -> SyncResult<ExchangeOutcome> {
        let observer = self.observer.as_ref();
        self.with_session(peer, |session, map| session.exchange(map, incoming, observer))
    }

    /// Initiator side: outgoing delta for `peer`, marked pending
    pub fn prepare_outgoing(&self, peer: &str) -> SyncResult<Delta> {
        self.with_session(peer, |session, map| session.begin_send(map))
    }

    /// Merge a delta from `peer` without producing a reply
    pub fn receive(&self, peer: &str, incoming: &Delta) -> SyncResult<MergeReport> {
        let observer = self.observer.as_ref();
        self.with_session(peer, |session, map| Ok(session.receive(map, incoming, observer)))
    }

    /// The transport confirmed the pending delta reached `peer`
    pub fn confirm_delivery(&self, peer: &str) -> SyncResult<()> {
        let mut sessions = self.sessions.lock().map_err(handle_poison)?;
        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| SyncError::NoExchangeInFlight(peer.to_string()))?;
        session.confirm_sent()
    }

    /// The pending delta for `peer` was not delivered
    pub fn abort_exchange(&self, peer: &str) -> SyncResult<()> {
        let mut sessions = self.sessions.lock().map_err(handle_poison)?;
        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| SyncError::NoExchangeInFlight(peer.to_string()))?;
        debug!(peer, "aborting exchange");
        session.abort()
    }

    /// Responder side of a round trip: decode, merge, encode the reply.
    ///
    /// The reply is derived from the clock summary in `request`, so nothing
    /// is left pending; a reply that never reaches the peer is rebuilt on
    /// its next request.
    pub fn respond(&self, peer: &str, request: &[u8]) -> SyncResult<Vec<u8>> {
        let incoming = Delta::decode(request)?;
        let observer = self.observer.as_ref();
        let outcome = self.with_session(peer, |session, map| session.reply(map, &incoming, observer))?;
        outcome.outgoing.encode()
    }

    // --- maintenance ----------------------------------------------------

    /// Drop tombstones every known peer has incorporated
    pub fn reap_tombstones(&self) -> SyncResult<usize> {
        let sessions = self.sessions.lock().map_err(handle_poison)?;
        let mut map = self.map.write().map_err(handle_poison)?;
        Ok(TombstoneReaper::reap(&mut *map, sessions.values().map(SyncSession::state)))
    }

    /// Map-only snapshot (entries + clock)
    pub fn save_snapshot(&self) -> SyncResult<Vec<u8>> {
        let map = self.map.read().map_err(handle_poison)?;
        snapshot::save_snapshot(&map)
    }

    /// Full replica: map plus every peer's SyncState
    pub fn save_state(&self) -> SyncResult<Vec<u8>> {
        let sessions = self.sessions.lock().map_err(handle_poison)?;
        let map = self.map.read().map_err(handle_poison)?;
        let peers: Vec<SyncState> = sessions.values().map(|s| s.state().clone()).collect();
        snapshot::save_replica(&map, &peers)
    }
}

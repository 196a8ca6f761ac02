//! Transport seam
//!
//! The engine never opens sockets. A host moves encoded deltas between
//! devices through a [`Transport`]; the sync driver only needs one
//! request/response round trip per exchange.

use crate::core_sync::crdt::DeviceId;
use crate::core_sync::store::errors::SyncError;
use crate::core_sync::sync::engine::SyncEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Failures reported by a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No route to the device
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// The message was lost in transit
    #[error("Message to {0} was dropped")]
    Dropped(String),

    /// The peer is mid-exchange with us and cannot take another one yet
    #[error("Peer {0} is busy")]
    Busy(String),

    /// The remote side refused or failed to process the request
    #[error("Remote error from {peer}: {reason}")]
    Remote { peer: String, reason: String },

    /// The transport itself is unusable
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// True when the same request may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Dropped(_) | TransportError::Busy(_) | TransportError::Unavailable(_)
        )
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        if err.is_retryable() {
            SyncError::Transport(err.to_string())
        } else {
            SyncError::PeerRejected(err.to_string())
        }
    }
}

/// One exchange request: an encoded delta from `from` to `to`
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub from: DeviceId,
    pub to: DeviceId,
    pub payload: Vec<u8>,
}

/// Request/response delivery between devices
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request` and return the peer's encoded reply delta.
    ///
    /// An `Ok` means the peer processed the request. The reply bytes carry
    /// no delivery guarantee; the initiator's next request tells the peer
    /// what it actually incorporated.
    async fn send(&self, request: SyncRequest) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Default)]
struct Faults {
    drop_requests: usize,
    drop_responses: usize,
}

/// In-process transport connecting engines that share an address space.
///
/// Used by tests and the CLI. Supports injecting lost requests and lost
/// replies so retry paths can be exercised deterministically.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: RwLock<HashMap<DeviceId, Arc<SyncEngine>>>,
    faults: Mutex<Faults>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `engine` reachable under its device id
    pub fn attach(&self, engine: Arc<SyncEngine>) -> Result<(), TransportError> {
        let mut peers = self.peers.write().map_err(|_| poisoned())?;
        peers.insert(engine.device_id().to_string(), engine);
        Ok(())
    }

    /// Remove a device; later requests to it fail with `UnknownPeer`
    pub fn detach(&self, device_id: &str) -> Result<(), TransportError> {
        let mut peers = self.peers.write().map_err(|_| poisoned())?;
        peers.remove(device_id);
        Ok(())
    }

    /// Lose the next `n` requests before they reach the peer
    pub fn drop_next_requests(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.drop_requests = n;
        }
    }

    /// Lose the next `n` replies after the peer has processed the request
    pub fn drop_next_responses(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.drop_responses = n;
        }
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut usize) -> Result<bool, TransportError> {
        let mut faults = self.faults.lock().map_err(|_| poisoned())?;
        let remaining = pick(&mut *faults);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn lookup(&self, device_id: &str) -> Result<Arc<SyncEngine>, TransportError> {
        let peers = self.peers.read().map_err(|_| poisoned())?;
        peers
            .get(device_id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(device_id.to_string()))
    }
}

fn poisoned() -> TransportError {
    TransportError::Unavailable("loopback state poisoned".to_string())
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, request: SyncRequest) -> Result<Vec<u8>, TransportError> {
        let responder = self.lookup(&request.to)?;

        if self.take_fault(|f| &mut f.drop_requests)? {
            debug!(from = %request.from, to = %request.to, "dropping request");
            return Err(TransportError::Dropped(request.to));
        }

        let reply = responder.respond(&request.from, &request.payload).map_err(|e| match e {
            SyncError::ExchangeInProgress(_) => TransportError::Busy(request.to.clone()),
            e => {
                warn!(peer = %request.to, error = %e, "responder failed");
                TransportError::Remote { peer: request.to.clone(), reason: e.to_string() }
            }
        })?;

        if self.take_fault(|f| &mut f.drop_responses)? {
            debug!(from = %request.to, to = %request.from, "dropping response");
            return Err(TransportError::Dropped(request.from));
        }
        Ok(reply)
    }
}

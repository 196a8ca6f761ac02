/*
    snapshot.rs - Replica snapshots for restart and offline periods

    A snapshot captures the LWWMap (entries, tombstones, clock) and,
    optionally, every peer's SyncState. Loading one yields a replica that
    behaves exactly like the one that wrote it.

    Envelope (bincode):
    - version: u8
    - checksum: crc32 of payload
    - payload: bincode-encoded body

    Files are written atomically (write to temp, then rename).
*/

use crate::core_sync::crdt::{DeviceId, Entry, LWWMap, VectorClock};
use crate::core_sync::store::errors::{SyncError, SyncResult};
use crate::core_sync::sync::session::SyncState;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    checksum: u32,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Body {
    owner: DeviceId,
    clock: VectorClock,
    entries: Vec<Entry>,
    peers: Vec<SyncState>,
}

/// A decoded replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub map: LWWMap,
    pub peers: Vec<SyncState>,
}

fn encode(map: &LWWMap, peers: &[SyncState]) -> SyncResult<Vec<u8>> {
    let body = Body {
        owner: map.owner().to_string(),
        clock: map.clock().clone(),
        entries: map.entries().cloned().collect(),
        peers: peers.to_vec(),
    };
    let payload = bincode::serialize(&body)?;
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        checksum: crc32fast::hash(&payload),
        payload,
    };
    Ok(bincode::serialize(&envelope)?)
}

/// Serialize the map alone
pub fn save_snapshot(map: &LWWMap) -> SyncResult<Vec<u8>> {
    encode(map, &[])
}

/// Serialize the map together with per-peer sync state
pub fn save_replica(map: &LWWMap, peers: &[SyncState]) -> SyncResult<Vec<u8>> {
    encode(map, peers)
}

/// Decode bytes from [`save_snapshot`] or [`save_replica`]
pub fn load_replica(bytes: &[u8]) -> SyncResult<ReplicaSnapshot> {
    let envelope: Envelope = bincode::deserialize(bytes)
        .map_err(|e| SyncError::Deserialization(format!("snapshot envelope: {}", e)))?;

    if envelope.version != SNAPSHOT_VERSION {
        return Err(SyncError::UnsupportedVersion(envelope.version));
    }

    let actual = crc32fast::hash(&envelope.payload);
    if actual != envelope.checksum {
        return Err(SyncError::CorruptedData(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            envelope.checksum, actual
        )));
    }

    let body: Body = bincode::deserialize(&envelope.payload)
        .map_err(|e| SyncError::Deserialization(format!("snapshot body: {}", e)))?;

    if body.peers.iter().any(|p| p.remote_device.is_empty() || p.remote_device == body.owner) {
        return Err(SyncError::CorruptedData("invalid peer in snapshot".to_string()));
    }

    let map = LWWMap::from_parts(body.owner, body.clock, body.entries)?;
    debug!(owner = %map.owner(), entries = map.entry_count(), peers = body.peers.len(), "decoded snapshot");
    Ok(ReplicaSnapshot { map, peers: body.peers })
}

/// Decode just the map, discarding any peer state
pub fn load_snapshot(bytes: &[u8]) -> SyncResult<LWWMap> {
    Ok(load_replica(bytes)?.map)
}

/// Write `bytes` to `path` via a sibling temp file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let io_err = |e: std::io::Error| SyncError::Storage(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(io_err)
}

/// Read a snapshot file written by [`write_atomic`]
pub fn read_file(path: &Path) -> SyncResult<Vec<u8>> {
    fs::read(path).map_err(|e| SyncError::Storage(format!("{}: {}", path.display(), e)))
}

#![no_main]

use libfuzzer_sys::fuzz_target;
use tidesync_core::core_sync::store::snapshot::{load_replica, save_replica};

fuzz_target!(|data: &[u8]| {
    // Anything that loads must save and reload to the same replica
    if let Ok(snapshot) = load_replica(data) {
        let bytes = save_replica(&snapshot.map, &snapshot.peers).unwrap();
        let reloaded = load_replica(&bytes).unwrap();
        assert_eq!(reloaded, snapshot);
    }
});

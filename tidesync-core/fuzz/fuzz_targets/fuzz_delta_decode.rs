#![no_main]

use libfuzzer_sys::fuzz_target;
use tidesync_core::core_sync::sync::merge::MergeEngine;
use tidesync_core::{Delta, LWWMap, NoopConflictObserver};

fuzz_target!(|data: &[u8]| {
    // Both wire encodings must reject garbage without panicking
    let decoded = Delta::decode(data).ok().or_else(|| Delta::from_json(data).ok());

    if let Some(delta) = decoded {
        let mut map = LWWMap::new("fuzz");
        map.set("seed", b"local".to_vec(), "fuzz").unwrap();

        MergeEngine::apply_delta(&mut map, &delta, &NoopConflictObserver);
        let once = map.clone();

        // Redelivery must not change anything
        MergeEngine::apply_delta(&mut map, &delta, &NoopConflictObserver);
        assert_eq!(map, once);
    }
});

//! Convergence assertions with readable failure output

use crate::core_sync::crdt::LWWMap;
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Assert every replica holds the same entries and the same clock
pub fn assert_converged(maps: &[&LWWMap]) {
    let Some((first, rest)) = maps.split_first() else {
        return;
    };
    for other in rest {
        if !first.same_entries(other) {
            let left: Vec<_> = first.entries().map(|e| (&e.key, &e.writer, &e.clock)).collect();
            let right: Vec<_> = other.entries().map(|e| (&e.key, &e.writer, &e.clock)).collect();
            panic!(
                "replicas {} and {} diverged\n  {}: {:?}\n  {}: {:?}",
                first.owner(),
                other.owner(),
                first.owner(),
                left,
                other.owner(),
                right
            );
        }
        assert_eq!(
            first.clock(),
            other.clock(),
            "clocks of {} and {} differ",
            first.owner(),
            other.owner()
        );
    }
}

/// Assert `key` reads as `expected` on every replica
pub fn assert_value_everywhere(maps: &[&LWWMap], key: &str, expected: Option<&[u8]>) {
    for map in maps {
        assert_eq!(map.get(key), expected, "key '{}' on replica {}", key, map.owner());
    }
}

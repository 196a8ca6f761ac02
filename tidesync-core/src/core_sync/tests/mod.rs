/*
    Integration tests for core_sync

    Test suite covering:
    - Vector clock ordering edge cases
    - LWW map merge and tombstone edge cases
    - Multi-replica convergence scenarios
    - Tombstone reaping safety
    - Algebraic merge laws (proptest)
    - Snapshot persistence
*/

pub mod lww_map_edge_cases;

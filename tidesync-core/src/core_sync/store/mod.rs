/*
    Store subsystem - Errors and persistence
*/

pub mod errors;
pub mod snapshot;

pub use errors::*;
pub use snapshot::{load_replica, load_snapshot, save_replica, save_snapshot, ReplicaSnapshot};

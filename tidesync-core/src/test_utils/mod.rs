//! Test utilities shared by unit tests, integration tests and benches
//!
//! Replica fixtures, convergence assertions and seeded workload generators.

pub mod assertions;
pub mod deterministic_rng;
pub mod fixtures;

pub use assertions::*;
pub use deterministic_rng::*;
pub use fixtures::*;

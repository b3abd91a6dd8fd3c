//! Test utilities shared by unit and integration tests
//!
//! Deterministic randomness plus a ready-made in-memory world with a
//! manual clock, so tests read as scenarios rather than setup.

pub mod deterministic_rng;
pub mod fixtures;

pub use deterministic_rng::*;
pub use fixtures::*;

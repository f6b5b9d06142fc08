//! Test utilities and helpers for datalock
//!
//! Fixtures, deterministic key material and async helpers shared by unit
//! and integration tests.

pub mod async_helpers;
pub mod deterministic_rng;
pub mod fixtures;

pub use async_helpers::*;
pub use deterministic_rng::*;
pub use fixtures::*;

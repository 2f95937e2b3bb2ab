//! Shared utilities.
//!
//! Content hashing and scoped directory helpers used by the store, the
//! studio manager and the lifecycle engine.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;

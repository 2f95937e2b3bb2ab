//! CLI integration tests: each test drives the `kiln` binary against an
//! isolated studio home, store and source cache.

mod common;

#[cfg(unix)]
mod build_tests;
#[cfg(unix)]
mod studio_tests;

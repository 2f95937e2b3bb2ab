//! kiln-lib: package build orchestration
//!
//! The pieces a build goes through, roughly in order:
//! - `plan`: declarative package plans and their hook lifecycle
//! - `resolve`: dependency graphs over plans and installed artifacts
//! - `studio`: isolated build sessions with a minimal environment
//! - `lifecycle`: running a plan's stages inside a studio
//! - `store`: content-addressed artifact installation and extraction
//! - `builder`: all of the above wired into one build

pub mod builder;
pub mod consts;
pub mod fetch;
pub mod lifecycle;
pub mod lock;
pub mod patch;
pub mod plan;
pub mod platform;
pub mod resolve;
pub mod store;
pub mod studio;
pub mod util;

//! Plan model.
//!
//! A plan is the declarative description of one buildable package: its
//! identity, sources, dependencies and the bodies of its lifecycle hooks.
//! Loading a plan validates it completely, so every later phase works with a
//! well-formed `Plan`.
//!
//! # Submodules
//!
//! - [`hooks`] - the closed hook set and override-or-default resolution
//! - [`ident`] - `origin/name/version/release` identifiers
//! - [`template`] - `${var}` rendering for `pkg_source`

pub mod hooks;
pub mod ident;
mod load;
pub mod template;
mod types;

pub use hooks::{BuildSystem, HookBody, HookOverride, Stage, resolve_hook};
pub use ident::{IdentError, PackageIdent};
pub use types::*;

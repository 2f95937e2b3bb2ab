mod build;
mod enter;
mod new;
mod rm;
mod run;
mod version;

pub use build::{BuildArgs, cmd_build};
pub use enter::cmd_enter;
pub use new::cmd_new;
pub use rm::cmd_rm;
pub use run::cmd_run;
pub use version::cmd_version;
